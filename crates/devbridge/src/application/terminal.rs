//! Terminal session manager.
//!
//! Owns every remote shell session, runs commands through the platform's
//! [`DeviceExecutor`], and publishes [`TerminalEvent`]s for the router to
//! broadcast.
//!
//! # Session state machine
//!
//! ```text
//!   create_session ──► Active ──close_session──► Closed ──grace delay──► removed
//!                        │ ▲
//!          execute_command│ │result / interrupt
//!                        ▼ │
//!                  Active + command in flight
//! ```
//!
//! # Cancellation
//!
//! Each in-flight command registers a token (a number unique for the lifetime
//! of the manager) under its session id.  `interrupt` removes the token.  When
//! the executor call returns, the command checks whether its own token is
//! still registered; if not, the result is recorded with exit code 130 and no
//! further events are emitted.  The device command itself keeps running: a
//! remote process cannot be preempted from here, only abandoned.
//!
//! # Locking
//!
//! All state lives behind one `tokio::sync::Mutex`.  The lock is never held
//! across an executor call, so a stalled device blocks only the command that
//! is waiting on it.  Events are sent while the lock is held so their order
//! on the channel matches the order of the state changes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use devbridge_core::domain::terminal::{chunk_output, resolve_path, INTERRUPTED_EXIT_CODE};
use devbridge_core::{
    BridgeError, CommandHistoryEntry, CommandResult, DeviceId, Executors, OutputStream, Platform,
    SessionId, TerminalSession,
};

use crate::domain::events::TerminalEvent;

/// Raw input that interrupts the running command (Ctrl+C).
pub const INTERRUPT_INPUT: &str = "\u{3}";

/// What a raw `input` call turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputOutcome {
    /// The input was Ctrl+C; `true` if a command was actually interrupted.
    Interrupted(bool),
    /// The input line was executed as a command.
    Executed(CommandResult),
    /// The input was an empty line.
    Ignored,
}

#[derive(Default)]
struct TerminalState {
    sessions: HashMap<SessionId, TerminalSession>,
    /// Cancellation tokens of in-flight commands, keyed by session.
    running: HashMap<SessionId, u64>,
    next_token: u64,
}

impl TerminalState {
    /// Removes the in-flight token (if any) and emits the interrupt pair.
    fn interrupt_running(
        &mut self,
        session_id: &str,
        events: &mpsc::UnboundedSender<TerminalEvent>,
    ) -> bool {
        if self.running.remove(session_id).is_none() {
            return false;
        }
        send(
            events,
            TerminalEvent::CommandInterrupted {
                session_id: session_id.to_string(),
            },
        );
        send(
            events,
            TerminalEvent::Output {
                session_id: session_id.to_string(),
                stream: OutputStream::Stderr,
                data: "^C\n".to_string(),
            },
        );
        true
    }
}

/// Manages terminal sessions.  Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TerminalSessionManager {
    state: Arc<Mutex<TerminalState>>,
    executors: Executors,
    events: mpsc::UnboundedSender<TerminalEvent>,
    grace_delay: Duration,
}

impl TerminalSessionManager {
    /// Creates the manager and the receiving end of its event stream.
    ///
    /// `grace_delay` is how long a closed session remains retrievable before
    /// it is dropped from the registry.
    pub fn new(
        executors: Executors,
        grace_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<TerminalEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let manager = Self {
            state: Arc::new(Mutex::new(TerminalState::default())),
            executors,
            events,
            grace_delay,
        };
        (manager, rx)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Opens a new active session in the platform's default directory.
    pub async fn create_session(&self, device_id: &str, platform: Platform) -> TerminalSession {
        let session = TerminalSession::new(device_id, platform);
        let mut state = self.state.lock().await;
        state
            .sessions
            .insert(session.info.session_id.clone(), session.clone());
        info!(
            "terminal session {} created on {platform} device {device_id}",
            session.info.session_id
        );
        send(&self.events, TerminalEvent::SessionCreated(session.clone()));
        session
    }

    /// Looks up a session, including closed ones still inside their grace
    /// delay.
    pub async fn get_session(&self, session_id: &str) -> Option<TerminalSession> {
        self.state.lock().await.sessions.get(session_id).cloned()
    }

    /// Closes a session.
    ///
    /// Any in-flight command is interrupted first.  The session is marked
    /// inactive and `session:closed` is emitted immediately; removal from the
    /// registry happens after the grace delay.  Closing an already-closed
    /// session is a no-op.
    ///
    /// # Errors
    ///
    /// [`BridgeError::SessionNotFound`] if the id is unknown (or was already
    /// removed).
    pub async fn close_session(&self, session_id: &str) -> Result<(), BridgeError> {
        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let session = state
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))?;
            if !session.info.is_active {
                return Ok(());
            }
            session.info.is_active = false;

            state.interrupt_running(session_id, &self.events);
            send(
                &self.events,
                TerminalEvent::SessionClosed {
                    session_id: session_id.to_string(),
                },
            );
        }

        info!("terminal session {session_id} closed");

        let state = Arc::clone(&self.state);
        let delay = self.grace_delay;
        let id = session_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if state.lock().await.sessions.remove(&id).is_some() {
                debug!("terminal session {id} removed after grace delay");
            }
        });

        Ok(())
    }

    /// Closes every active session on `device_id` and returns their ids.
    pub async fn close_device_sessions(&self, device_id: &str) -> Vec<SessionId> {
        let ids: Vec<SessionId> = {
            let state = self.state.lock().await;
            state
                .sessions
                .values()
                .filter(|s| s.info.is_active && s.info.device_id == device_id)
                .map(|s| s.info.session_id.clone())
                .collect()
        };
        for id in &ids {
            // A concurrent close may have won; nothing to report either way.
            let _ = self.close_session(id).await;
        }
        ids
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Runs `command` in the session's working directory.
    ///
    /// Emits `command:start`, then (on success) the stdout chunks, the stderr
    /// chunks and `command:complete`.  An executor failure becomes a result
    /// with exit code 1 and the error text as stderr, and emits
    /// `command:error` instead.  A non-zero exit code is not an error.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::SessionNotFound`] for an unknown id.
    /// - [`BridgeError::SessionInactive`] for a closed session.
    /// - [`BridgeError::CommandInProgress`] if the session already has a
    ///   command in flight.
    pub async fn execute_command(
        &self,
        session_id: &str,
        command: &str,
    ) -> Result<CommandResult, BridgeError> {
        let (token, device_id, platform, wrapped) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let session = state
                .sessions
                .get(session_id)
                .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))?;
            if !session.info.is_active {
                return Err(BridgeError::SessionInactive(session_id.to_string()));
            }
            if state.running.contains_key(session_id) {
                return Err(BridgeError::CommandInProgress(session_id.to_string()));
            }

            let device_id: DeviceId = session.info.device_id.clone();
            let platform = session.info.platform;
            let wrapped = session.wrap_command(command);

            state.next_token += 1;
            let token = state.next_token;
            state.running.insert(session_id.to_string(), token);

            send(
                &self.events,
                TerminalEvent::CommandStart {
                    session_id: session_id.to_string(),
                    command: command.to_string(),
                },
            );
            (token, device_id, platform, wrapped)
        };

        debug!("terminal {session_id}: executing '{wrapped}' on {device_id}");
        let started = tokio::time::Instant::now();
        let outcome = self
            .executors
            .for_platform(platform)
            .execute_command(&device_id, &wrapped)
            .await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let still_current = state.running.get(session_id) == Some(&token);
        if still_current {
            state.running.remove(session_id);
        }

        let (mut result, failure) = match outcome {
            Ok(output) => (CommandResult::from(output), None),
            Err(e) => (CommandResult::failure(e.to_string(), elapsed_ms), Some(e)),
        };

        if !still_current {
            result.exit_code = INTERRUPTED_EXIT_CODE;
            if let Some(session) = state.sessions.get_mut(session_id) {
                session.record(command, &result);
            }
            debug!("terminal {session_id}: discarded result of interrupted '{command}'");
            return Ok(result);
        }

        if let Some(session) = state.sessions.get_mut(session_id) {
            session.record(command, &result);
        }

        match failure {
            None => {
                for (stream, text) in [
                    (OutputStream::Stdout, &result.stdout),
                    (OutputStream::Stderr, &result.stderr),
                ] {
                    for chunk in chunk_output(text) {
                        send(
                            &self.events,
                            TerminalEvent::Output {
                                session_id: session_id.to_string(),
                                stream,
                                data: chunk,
                            },
                        );
                    }
                }
                send(
                    &self.events,
                    TerminalEvent::CommandComplete {
                        session_id: session_id.to_string(),
                        command: command.to_string(),
                        result: result.clone(),
                    },
                );
            }
            Some(e) => {
                warn!("terminal {session_id}: '{command}' failed on {device_id}: {e}");
                send(
                    &self.events,
                    TerminalEvent::CommandError {
                        session_id: session_id.to_string(),
                        command: command.to_string(),
                        result: result.clone(),
                    },
                );
            }
        }

        Ok(result)
    }

    /// Handles raw terminal input.
    ///
    /// `"\u{3}"` interrupts; any other text has its trailing line ending
    /// removed and is executed.  An empty line is ignored.
    ///
    /// # Errors
    ///
    /// Same as [`execute_command`](Self::execute_command) and
    /// [`interrupt`](Self::interrupt).
    pub async fn input(&self, session_id: &str, data: &str) -> Result<InputOutcome, BridgeError> {
        if data == INTERRUPT_INPUT {
            return self.interrupt(session_id).await.map(InputOutcome::Interrupted);
        }

        let line = data.trim_end_matches(&['\n', '\r'][..]);
        if line.trim().is_empty() {
            return Ok(InputOutcome::Ignored);
        }
        self.execute_command(session_id, line)
            .await
            .map(InputOutcome::Executed)
    }

    /// Interrupts the in-flight command, if any.
    ///
    /// Returns `true` and emits `command:interrupted` plus a `"^C\n"` stderr
    /// output event when a command was in flight.  On an idle session this is
    /// a no-op that returns `false` and emits nothing.
    ///
    /// # Errors
    ///
    /// [`BridgeError::SessionNotFound`] for an unknown id.
    pub async fn interrupt(&self, session_id: &str) -> Result<bool, BridgeError> {
        let mut state = self.state.lock().await;
        if !state.sessions.contains_key(session_id) {
            return Err(BridgeError::SessionNotFound(session_id.to_string()));
        }
        let interrupted = state.interrupt_running(session_id, &self.events);
        if interrupted {
            info!("terminal {session_id}: command interrupted");
        }
        Ok(interrupted)
    }

    // ── Bookkeeping ───────────────────────────────────────────────────────────

    /// Changes the session's working directory and returns the new one.
    ///
    /// The path is resolved against the current directory (`..`, `.`,
    /// relative and absolute forms).  The device is not consulted, so a
    /// non-existent directory only shows up when the next command runs.
    ///
    /// # Errors
    ///
    /// [`BridgeError::SessionNotFound`] or [`BridgeError::SessionInactive`].
    pub async fn change_directory(&self, session_id: &str, path: &str) -> Result<String, BridgeError> {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))?;
        if !session.info.is_active {
            return Err(BridgeError::SessionInactive(session_id.to_string()));
        }
        session.working_directory = resolve_path(&session.working_directory, path);
        debug!(
            "terminal {session_id}: working directory is now {}",
            session.working_directory
        );
        Ok(session.working_directory.clone())
    }

    /// # Errors
    ///
    /// [`BridgeError::SessionNotFound`] for an unknown id.
    pub async fn get_history(&self, session_id: &str) -> Result<Vec<CommandHistoryEntry>, BridgeError> {
        let state = self.state.lock().await;
        state
            .sessions
            .get(session_id)
            .map(|s| s.history.clone())
            .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))
    }

    /// # Errors
    ///
    /// [`BridgeError::SessionNotFound`] for an unknown id.
    pub async fn clear_history(&self, session_id: &str) -> Result<(), BridgeError> {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))?;
        session.history.clear();
        Ok(())
    }

    /// All sessions that have not been closed.
    pub async fn get_active_sessions(&self) -> Vec<TerminalSession> {
        let state = self.state.lock().await;
        state
            .sessions
            .values()
            .filter(|s| s.info.is_active)
            .cloned()
            .collect()
    }
}

/// Sends an event, tolerating a dropped receiver (router shut down).
fn send(events: &mpsc::UnboundedSender<TerminalEvent>, event: TerminalEvent) {
    if events.send(event).is_err() {
        debug!("terminal event dropped: no subscriber");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
