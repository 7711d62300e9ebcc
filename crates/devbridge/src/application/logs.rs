//! Log capture manager.
//!
//! Each log session polls its device once per `poll_interval` (1 s by
//! default) through the platform executor, parses the dump with
//! [`log_parser`](super::log_parser), appends every new entry to the
//! session's ring buffer, and emits a `log` event for each entry that matches
//! the session's *current* filter.
//!
//! The buffer always keeps everything that was ingested (up to its capacity),
//! whatever the filter says; `get_logs` filters on the way out with whichever
//! filter the caller supplies.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, trace, warn};

use devbridge_core::domain::log::LogSessionSummary;
use devbridge_core::{
    matches_filter, BridgeError, Executors, LogEntry, LogFilter, LogSession, Platform, SessionId,
};

use crate::application::log_parser::{ingest_output, poll_command, PollCursor};
use crate::application::ticker::{TickFlow, Ticker};
use crate::domain::config::LogSettings;
use crate::domain::events::LogEvent;

struct LogEntryState {
    session: LogSession,
    cursor: PollCursor,
    poller: Option<Ticker>,
}

type LogRegistry = HashMap<SessionId, LogEntryState>;

/// Manages log capture sessions.  Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LogCaptureManager {
    state: Arc<Mutex<LogRegistry>>,
    executors: Executors,
    events: mpsc::UnboundedSender<LogEvent>,
    settings: LogSettings,
}

impl LogCaptureManager {
    pub fn new(
        executors: Executors,
        settings: LogSettings,
    ) -> (Self, mpsc::UnboundedReceiver<LogEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let manager = Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            executors,
            events,
            settings,
        };
        (manager, rx)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Creates a session and starts its polling loop.  Emits
    /// `capture:started`.
    pub async fn start_capture(
        &self,
        device_id: &str,
        platform: Platform,
        filter: Option<LogFilter>,
    ) -> LogSessionSummary {
        let session = LogSession::new(device_id, platform, filter, self.settings.buffer_capacity);
        let session_id = session.info.session_id.clone();
        let summary = session.summary();

        let poller = self.spawn_poller(&session_id);
        let mut state = self.state.lock().await;
        state.insert(
            session_id.clone(),
            LogEntryState {
                session,
                cursor: PollCursor::default(),
                poller: Some(poller),
            },
        );

        info!("log capture {session_id} started on {platform} device {device_id}");
        send(&self.events, LogEvent::CaptureStarted(summary.clone()));
        summary
    }

    /// Stops polling and removes the session.  Emits `capture:stopped`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::SessionNotFound`] for an unknown id.
    pub async fn stop_capture(&self, session_id: &str) -> Result<(), BridgeError> {
        let mut state = self.state.lock().await;
        let mut entry = state
            .remove(session_id)
            .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))?;
        entry.poller = None;

        info!("log capture {session_id} stopped");
        send(
            &self.events,
            LogEvent::CaptureStopped {
                session_id: session_id.to_string(),
                device_id: entry.session.info.device_id.clone(),
            },
        );
        Ok(())
    }

    /// Stops every session on `device_id` and returns their ids.
    pub async fn stop_device(&self, device_id: &str) -> Vec<SessionId> {
        let ids: Vec<SessionId> = {
            let state = self.state.lock().await;
            state
                .values()
                .filter(|e| e.session.info.device_id == device_id)
                .map(|e| e.session.info.session_id.clone())
                .collect()
        };
        for id in &ids {
            let _ = self.stop_capture(id).await;
        }
        ids
    }

    /// Stops every session.  Returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let ids: Vec<SessionId> = self.state.lock().await.keys().cloned().collect();
        let mut stopped = 0;
        for id in &ids {
            if self.stop_capture(id).await.is_ok() {
                stopped += 1;
            }
        }
        stopped
    }

    // ── Ingestion ─────────────────────────────────────────────────────────────

    /// Appends `entries` to the session's buffer (evicting the oldest beyond
    /// capacity) and emits `log` for each entry matching the current filter.
    /// Returns how many events were emitted.
    ///
    /// # Errors
    ///
    /// [`BridgeError::SessionNotFound`] for an unknown id.
    pub async fn ingest(&self, session_id: &str, entries: Vec<LogEntry>) -> Result<usize, BridgeError> {
        let mut state = self.state.lock().await;
        let entry = state
            .get_mut(session_id)
            .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))?;
        Ok(push_entries(&mut entry.session, entries, &self.events))
    }

    fn spawn_poller(&self, session_id: &str) -> Ticker {
        let poller = Poller {
            state: Arc::downgrade(&self.state),
            executors: self.executors.clone(),
            events: self.events.clone(),
            tail_lines: self.settings.initial_tail_lines,
            session_id: session_id.to_string(),
        };
        Ticker::start(self.settings.poll_interval, move || {
            let poller = poller.clone();
            async move { poller.tick().await }
        })
    }

    // ── Queries and filter ────────────────────────────────────────────────────

    /// Buffered entries matching `filter` (all entries when `None`).  The
    /// session's stored filter is neither used nor changed.
    ///
    /// # Errors
    ///
    /// [`BridgeError::SessionNotFound`] for an unknown id.
    pub async fn get_logs(
        &self,
        session_id: &str,
        filter: Option<&LogFilter>,
    ) -> Result<Vec<LogEntry>, BridgeError> {
        let state = self.state.lock().await;
        state
            .get(session_id)
            .map(|e| e.session.buffer.filtered(filter))
            .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))
    }

    /// Replaces the session's filter for entries ingested from now on.
    /// Already-buffered entries are untouched.  Emits `filter:updated`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::SessionNotFound`] for an unknown id.
    pub async fn set_filter(
        &self,
        session_id: &str,
        filter: Option<LogFilter>,
    ) -> Result<(), BridgeError> {
        let mut state = self.state.lock().await;
        let entry = state
            .get_mut(session_id)
            .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))?;
        entry.session.filter = filter.clone();

        debug!("log capture {session_id}: filter updated to {filter:?}");
        send(
            &self.events,
            LogEvent::FilterUpdated {
                session_id: session_id.to_string(),
                filter,
            },
        );
        Ok(())
    }

    /// Empties the session's buffer.  Emits `logs:cleared`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::SessionNotFound`] for an unknown id.
    pub async fn clear_logs(&self, session_id: &str) -> Result<(), BridgeError> {
        let mut state = self.state.lock().await;
        let entry = state
            .get_mut(session_id)
            .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))?;
        entry.session.buffer.clear();
        send(
            &self.events,
            LogEvent::LogsCleared {
                session_id: session_id.to_string(),
            },
        );
        Ok(())
    }

    pub async fn get_active_sessions(&self) -> Vec<LogSessionSummary> {
        let state = self.state.lock().await;
        state.values().map(|e| e.session.summary()).collect()
    }
}

// ── Polling loop ──────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Poller {
    state: Weak<Mutex<LogRegistry>>,
    executors: Executors,
    events: mpsc::UnboundedSender<LogEvent>,
    tail_lines: u32,
    session_id: SessionId,
}

impl Poller {
    async fn tick(&self) -> TickFlow {
        let Some(state) = self.state.upgrade() else {
            return TickFlow::Stop;
        };

        let (device_id, platform, command) = {
            let guard = state.lock().await;
            let Some(entry) = guard.get(&self.session_id) else {
                return TickFlow::Stop;
            };
            let platform = entry.session.info.platform;
            (
                entry.session.info.device_id.clone(),
                platform,
                poll_command(platform, &entry.cursor, self.tail_lines),
            )
        };

        trace!("log capture {}: polling with '{command}'", self.session_id);
        let output = self
            .executors
            .for_platform(platform)
            .execute_command(&device_id, &command)
            .await;

        let mut guard = state.lock().await;
        let Some(entry) = guard.get_mut(&self.session_id) else {
            return TickFlow::Stop;
        };

        match output {
            Ok(output) if output.exit_code == 0 => {
                let parsed = ingest_output(platform, &output.stdout, &device_id, &mut entry.cursor);
                let emitted = push_entries(&mut entry.session, parsed, &self.events);
                trace!("log capture {}: {emitted} entries emitted", self.session_id);
            }
            Ok(output) => {
                warn!(
                    "log capture {}: poll exited with {}: {}",
                    self.session_id,
                    output.exit_code,
                    output.stderr.trim()
                );
            }
            Err(e) => {
                warn!("log capture {}: poll failed: {e}", self.session_id);
            }
        }
        TickFlow::Continue
    }
}

fn push_entries(
    session: &mut LogSession,
    entries: Vec<LogEntry>,
    events: &mpsc::UnboundedSender<LogEvent>,
) -> usize {
    let mut emitted = 0;
    for entry in entries {
        if matches_filter(&entry, session.filter.as_ref()) {
            send(
                events,
                LogEvent::Entry {
                    session_id: session.info.session_id.clone(),
                    entry: entry.clone(),
                },
            );
            emitted += 1;
        }
        session.buffer.push(entry);
    }
    emitted
}

fn send(events: &mpsc::UnboundedSender<LogEvent>, event: LogEvent) {
    if events.send(event).is_err() {
        debug!("log event dropped: no subscriber");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
