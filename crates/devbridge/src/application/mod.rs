//! Application layer for the device bridge.
//!
//! The application layer holds the session managers and the router.  It knows
//! *what* to do with a terminal, capture or log session, and delegates *how*
//! a command reaches a device to the `DeviceExecutor` it is given.
//!
//! # Responsibilities
//!
//! - Terminal sessions: command execution, history, interrupts, grace-delayed
//!   removal
//! - Screen capture sessions: the per-session frame loop and its metrics
//! - Log capture sessions: polling, parsing, filtering, the bounded buffer
//! - One-shot device operations (files, permissions, apps, discovery)
//! - Routing envelopes to all of the above and fanning their events out
//!
//! # What does NOT belong here?
//!
//! - Accepting sockets or WebSocket framing (that is infrastructure)
//! - Spawning device tools as child processes (that is infrastructure)
//! - Reading configuration files (that is infrastructure)

pub mod connections;
pub mod device_ops;
pub mod log_parser;
pub mod logs;
pub mod router;
pub mod screen;
pub mod terminal;
pub mod ticker;

// Re-export the managers so callers can write `application::Router`.
pub use connections::{ClientId, ConnectionRegistry};
pub use device_ops::DeviceOps;
pub use logs::LogCaptureManager;
pub use router::Router;
pub use screen::ScreenCaptureManager;
pub use terminal::{InputOutcome, TerminalSessionManager};
