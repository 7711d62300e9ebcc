//! Domain layer for the device bridge service.
//!
//! Pure types with no I/O: runtime configuration and the typed events each
//! session manager publishes.  The session model itself lives in
//! `devbridge-core` so other tools can share it.
//!
//! # What does NOT belong here?
//!
//! - Sockets, processes, timers
//! - Reading files or environment variables

pub mod config;
pub mod events;

pub use config::{BridgeConfig, LogSettings, TerminalSettings, ToolTemplates};
pub use events::{AppEvent, CaptureEvent, LogEvent, TerminalEvent};
