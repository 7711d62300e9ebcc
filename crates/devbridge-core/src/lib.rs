//! # devbridge-core
//!
//! Shared library for the device bridge containing the session data model,
//! the JSON envelope protocol, the error taxonomy, and the contract that
//! platform device executors implement.
//!
//! This crate is used by the bridge service and by anything that wants to
//! speak its protocol.  It has zero dependencies on sockets, processes, or an
//! async runtime.
//!
//! # Architecture overview (for beginners)
//!
//! The device bridge lets a browser drive Android and iOS devices: open a
//! remote shell, stream the screen, or tail the device log.  All of that
//! traffic is multiplexed over one WebSocket connection.
//!
//! This crate is the shared foundation.  It defines:
//!
//! - **`domain`** – The session types (terminal, screen capture, log capture),
//!   the log filter predicate, and the bounded log ring buffer.
//!
//! - **`protocol`** – The JSON envelopes that travel over the WebSocket:
//!   inbound requests, correlated replies, and uncorrelated broadcasts.
//!
//! - **`executor`** – The traits the bridge uses to reach real devices
//!   (`DeviceExecutor`, `DeviceDiscovery`).  Implementations live elsewhere.
//!
//! - **`error`** – The `BridgeError` taxonomy every manager reports through.
//!
//! - **`shell`** – Quoting for values spliced into device command lines.

pub mod domain;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod shell;

// Re-export the most-used types at the crate root so callers can write
// `devbridge_core::Platform` instead of `devbridge_core::domain::session::Platform`.
pub use domain::capture::{CaptureMetrics, CaptureOptions, CaptureSession, Quality};
pub use domain::log::{matches_filter, LogBuffer, LogEntry, LogFilter, LogLevel, LogSession};
pub use domain::session::{DeviceId, Platform, SessionId, SessionInfo};
pub use domain::terminal::{CommandHistoryEntry, CommandResult, OutputStream, TerminalSession};
pub use shell::{shell_quote, shell_word};
pub use error::BridgeError;
pub use executor::{
    CommandOutput, DeviceDiscovery, DeviceExecutor, DeviceInfo, ExecutorError, Executors,
};
pub use protocol::envelope::{decode_envelope, Broadcast, Envelope, MessageType, Reply};
