//! The device executor contract.
//!
//! The bridge never talks to adb or libimobiledevice directly.  Every manager
//! goes through [`DeviceExecutor`], and device enumeration goes through
//! [`DeviceDiscovery`].  Production implementations spawn host tools; tests
//! inject in-memory doubles.
//!
//! Calls into an executor are the only suspension points inside a session
//! manager.  A call that never returns stalls the session that made it and
//! nothing else.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::session::Platform;
use crate::domain::terminal::CommandResult;

/// Raw result of running one command on a device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

impl CommandOutput {
    /// A zero-exit output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            ..Self::default()
        }
    }
}

impl From<CommandOutput> for CommandResult {
    fn from(output: CommandOutput) -> Self {
        CommandResult {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms: output.duration_ms,
        }
    }
}

/// Failures reaching a device.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The host tool could not be started.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The screen could not be captured.
    #[error("screen capture failed: {0}")]
    Capture(String),

    /// The executor has no way to perform this operation.
    #[error("unsupported by executor: {0}")]
    Unsupported(String),

    /// Any other executor failure.
    #[error("{0}")]
    Failed(String),
}

/// Runs commands on, and captures the screen of, devices of one platform.
#[async_trait]
pub trait DeviceExecutor: Send + Sync {
    /// Runs `command` on `device_id` and returns its exit code and output.
    async fn execute_command(
        &self,
        device_id: &str,
        command: &str,
    ) -> Result<CommandOutput, ExecutorError>;

    /// Captures one screen frame of `device_id` as encoded image bytes.
    async fn capture_screen(&self, device_id: &str) -> Result<Vec<u8>, ExecutorError>;
}

/// A device visible to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub id: String,
    pub platform: Platform,
    pub name: String,
    /// Tool-reported state, e.g. `"device"`, `"offline"`, `"unauthorized"`.
    pub state: String,
}

/// Enumerates the devices the bridge can currently reach.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, ExecutorError>;
}

/// One executor per platform.
///
/// Sessions carry their platform, so managers pick the executor per call with
/// [`Executors::for_platform`].
#[derive(Clone)]
pub struct Executors {
    android: Arc<dyn DeviceExecutor>,
    ios: Arc<dyn DeviceExecutor>,
}

impl Executors {
    pub fn new(android: Arc<dyn DeviceExecutor>, ios: Arc<dyn DeviceExecutor>) -> Self {
        Self { android, ios }
    }

    /// Uses the same executor for both platforms (handy in tests).
    pub fn uniform(executor: Arc<dyn DeviceExecutor>) -> Self {
        Self {
            android: Arc::clone(&executor),
            ios: executor,
        }
    }

    pub fn for_platform(&self, platform: Platform) -> &Arc<dyn DeviceExecutor> {
        match platform {
            Platform::Android => &self.android,
            Platform::Ios => &self.ios,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedExecutor(&'static str);

    #[async_trait]
    impl DeviceExecutor for FixedExecutor {
        async fn execute_command(
            &self,
            _device_id: &str,
            _command: &str,
        ) -> Result<CommandOutput, ExecutorError> {
            Ok(CommandOutput::ok(self.0))
        }

        async fn capture_screen(&self, _device_id: &str) -> Result<Vec<u8>, ExecutorError> {
            Ok(self.0.as_bytes().to_vec())
        }
    }

    #[tokio::test]
    async fn test_executors_pick_by_platform() {
        // Arrange
        let executors = Executors::new(
            Arc::new(FixedExecutor("android")),
            Arc::new(FixedExecutor("ios")),
        );

        // Act
        let android = executors
            .for_platform(Platform::Android)
            .execute_command("d", "true")
            .await
            .unwrap();
        let ios = executors
            .for_platform(Platform::Ios)
            .capture_screen("d")
            .await
            .unwrap();

        // Assert
        assert_eq!(android.stdout, "android");
        assert_eq!(ios, b"ios".to_vec());
    }

    #[tokio::test]
    async fn test_mock_discovery_returns_scripted_devices() {
        let mut discovery = MockDeviceDiscovery::new();
        discovery.expect_list_devices().times(1).returning(|| {
            Ok(vec![DeviceInfo {
                id: "emulator-5554".to_string(),
                platform: Platform::Android,
                name: "Pixel 7".to_string(),
                state: "device".to_string(),
            }])
        });

        let devices = tokio_test::assert_ok!(discovery.list_devices().await);

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "emulator-5554");
    }

    #[test]
    fn test_command_output_converts_into_result() {
        let output = CommandOutput {
            exit_code: 3,
            stdout: "o".to_string(),
            stderr: "e".to_string(),
            duration_ms: 9,
        };
        let result: CommandResult = output.into();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr, "e");
        assert_eq!(result.duration_ms, 9);
    }
}
