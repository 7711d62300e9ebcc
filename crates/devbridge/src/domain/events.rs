//! Typed manager events.
//!
//! Each session manager publishes one tagged-union event stream over an
//! unbounded `tokio::sync::mpsc` channel created alongside the manager.  The
//! router owns the receiving end and turns every event into a broadcast
//! envelope whose `type` is `"<domain>:<event>"`.
//!
//! Every variant maps to exactly one broadcast tag through the exhaustive
//! `match` in its enum's `broadcast_type`.

use chrono::{DateTime, Utc};

use devbridge_core::domain::log::LogSessionSummary;
use devbridge_core::{
    CaptureMetrics, CaptureSession, CommandResult, DeviceId, LogEntry, LogFilter, OutputStream,
    Quality, SessionId, TerminalSession,
};

// ── Terminal ──────────────────────────────────────────────────────────────────

/// Events emitted by the terminal session manager.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalEvent {
    SessionCreated(TerminalSession),
    SessionClosed {
        session_id: SessionId,
    },
    CommandStart {
        session_id: SessionId,
        command: String,
    },
    /// One slice (at most 1024 characters) of command output.
    Output {
        session_id: SessionId,
        stream: OutputStream,
        data: String,
    },
    CommandComplete {
        session_id: SessionId,
        command: String,
        result: CommandResult,
    },
    /// The executor failed; `result` is the synthetic exit-code-1 result.
    CommandError {
        session_id: SessionId,
        command: String,
        result: CommandResult,
    },
    CommandInterrupted {
        session_id: SessionId,
    },
}

impl TerminalEvent {
    pub fn broadcast_type(&self) -> &'static str {
        match self {
            TerminalEvent::SessionCreated(_) => "terminal:session:created",
            TerminalEvent::SessionClosed { .. } => "terminal:session:closed",
            TerminalEvent::CommandStart { .. } => "terminal:command:start",
            TerminalEvent::Output { .. } => "terminal:output",
            TerminalEvent::CommandComplete { .. } => "terminal:command:complete",
            TerminalEvent::CommandError { .. } => "terminal:command:error",
            TerminalEvent::CommandInterrupted { .. } => "terminal:command:interrupted",
        }
    }
}

// ── Screen capture ────────────────────────────────────────────────────────────

/// Events emitted by the screen capture manager.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    CaptureStarted(CaptureSession),
    CaptureStopped {
        session_id: SessionId,
        device_id: DeviceId,
    },
    /// One captured frame.  `data` is the raw encoded image; the router
    /// base64-encodes it for the JSON broadcast.
    Frame {
        session_id: SessionId,
        device_id: DeviceId,
        frame_number: u64,
        timestamp: DateTime<Utc>,
        data: Vec<u8>,
    },
    MetricsUpdate {
        session_id: SessionId,
        metrics: CaptureMetrics,
    },
    QualityChanged {
        session_id: SessionId,
        quality: Quality,
        frame_rate: u32,
    },
}

impl CaptureEvent {
    pub fn broadcast_type(&self) -> &'static str {
        match self {
            CaptureEvent::CaptureStarted(_) => "screen:capture:started",
            CaptureEvent::CaptureStopped { .. } => "screen:capture:stopped",
            CaptureEvent::Frame { .. } => "screen:frame",
            CaptureEvent::MetricsUpdate { .. } => "screen:metrics:update",
            CaptureEvent::QualityChanged { .. } => "screen:quality:changed",
        }
    }
}

// ── Log capture ───────────────────────────────────────────────────────────────

/// Events emitted by the log capture manager.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    CaptureStarted(LogSessionSummary),
    CaptureStopped {
        session_id: SessionId,
        device_id: DeviceId,
    },
    /// A newly ingested entry that matched the session's current filter.
    Entry {
        session_id: SessionId,
        entry: LogEntry,
    },
    LogsCleared {
        session_id: SessionId,
    },
    FilterUpdated {
        session_id: SessionId,
        filter: Option<LogFilter>,
    },
}

impl LogEvent {
    pub fn broadcast_type(&self) -> &'static str {
        match self {
            LogEvent::CaptureStarted(_) => "log:capture:started",
            LogEvent::CaptureStopped { .. } => "log:capture:stopped",
            LogEvent::Entry { .. } => "log:log",
            LogEvent::LogsCleared { .. } => "log:logs:cleared",
            LogEvent::FilterUpdated { .. } => "log:filter:updated",
        }
    }
}

// ── App management ────────────────────────────────────────────────────────────

/// Events emitted by app-management operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Uninstalled {
        device_id: DeviceId,
        package_name: String,
    },
    Launched {
        device_id: DeviceId,
        package_name: String,
    },
    Stopped {
        device_id: DeviceId,
        package_name: String,
    },
}

impl AppEvent {
    pub fn broadcast_type(&self) -> &'static str {
        match self {
            AppEvent::Uninstalled { .. } => "app:uninstalled",
            AppEvent::Launched { .. } => "app:launched",
            AppEvent::Stopped { .. } => "app:stopped",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
