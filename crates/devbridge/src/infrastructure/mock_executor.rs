//! Scriptable in-memory device executor.
//!
//! Lets unit and integration tests drive every session manager without adb,
//! libimobiledevice, or a real device.  Responses are scripted by command
//! suffix (terminal commands arrive wrapped as `cd <dir> && <command>`, so
//! matching on the suffix lets a test script `"echo hi"` directly).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use devbridge_core::{CommandOutput, DeviceExecutor, ExecutorError};

/// Bytes returned by `capture_screen` when no frame has been scripted.
pub const DEFAULT_FRAME: &[u8] = b"\x89PNG\r\n\x1a\n";

enum Scripted {
    Output(CommandOutput),
    Failure(String),
}

#[derive(Default)]
struct MockState {
    responses: Vec<(String, Scripted)>,
    frames: VecDeque<Result<Vec<u8>, String>>,
    calls: Vec<(String, String)>,
    captures: usize,
    capture_latency: Duration,
    hold: Option<Arc<Notify>>,
}

/// A [`DeviceExecutor`] whose behaviour is set up by the test.
#[derive(Default)]
pub struct MockDeviceExecutor {
    state: Mutex<MockState>,
}

impl MockDeviceExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any command ending with `suffix` returns `output`.
    ///
    /// Later scripts take precedence over earlier ones for the same suffix.
    pub fn respond(&self, suffix: impl Into<String>, output: CommandOutput) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.responses.push((suffix.into(), Scripted::Output(output)));
    }

    /// Any command ending with `suffix` fails with `message`.
    pub fn fail(&self, suffix: impl Into<String>, message: impl Into<String>) {
        let mut state = self.state.lock().expect("lock poisoned");
        state
            .responses
            .push((suffix.into(), Scripted::Failure(message.into())));
    }

    /// Makes every subsequent `execute_command` wait until the returned
    /// [`Notify`] is signalled once per held call.
    pub fn hold_commands(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.state.lock().expect("lock poisoned").hold = Some(Arc::clone(&notify));
        notify
    }

    /// Queues the result of the next `capture_screen` call.
    pub fn push_frame(&self, frame: Result<Vec<u8>, String>) {
        self.state.lock().expect("lock poisoned").frames.push_back(frame);
    }

    /// Each `capture_screen` call sleeps for `latency` before returning.
    pub fn set_capture_latency(&self, latency: Duration) {
        self.state.lock().expect("lock poisoned").capture_latency = latency;
    }

    /// Every `(device_id, command)` passed to `execute_command`, in order.
    pub fn commands(&self) -> Vec<(String, String)> {
        self.state.lock().expect("lock poisoned").calls.clone()
    }

    /// Number of `capture_screen` calls so far.
    pub fn capture_count(&self) -> usize {
        self.state.lock().expect("lock poisoned").captures
    }
}

#[async_trait]
impl DeviceExecutor for MockDeviceExecutor {
    async fn execute_command(
        &self,
        device_id: &str,
        command: &str,
    ) -> Result<CommandOutput, ExecutorError> {
        let (result, hold) = {
            let mut state = self.state.lock().expect("lock poisoned");
            state.calls.push((device_id.to_string(), command.to_string()));

            let result = match state
                .responses
                .iter()
                .rev()
                .find(|(suffix, _)| command.ends_with(suffix.as_str()))
            {
                Some((_, Scripted::Output(output))) => Ok(output.clone()),
                Some((_, Scripted::Failure(message))) => Err(ExecutorError::Failed(message.clone())),
                None => Ok(CommandOutput::ok("")),
            };
            (result, state.hold.clone())
        };

        if let Some(notify) = hold {
            notify.notified().await;
        }
        result
    }

    async fn capture_screen(&self, _device_id: &str) -> Result<Vec<u8>, ExecutorError> {
        let (next, latency) = {
            let mut state = self.state.lock().expect("lock poisoned");
            state.captures += 1;
            (state.frames.pop_front(), state.capture_latency)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match next {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(message)) => Err(ExecutorError::Capture(message)),
            None => Ok(DEFAULT_FRAME.to_vec()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
