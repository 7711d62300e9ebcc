//! Infrastructure layer for the device bridge.
//!
//! The infrastructure layer handles all I/O: accepting WebSocket connections
//! from clients, spawning host tools that reach devices, and reading the
//! configuration file.
//!
//! # Responsibilities
//!
//! - Binding a TCP listener and performing the WebSocket upgrade handshake
//!   on the bridge's route path
//! - Per-connection reader and writer tasks
//! - Running `adb` / libimobiledevice / ssh as child processes
//! - Listing attached devices
//! - Parsing the TOML configuration file
//!
//! # What does NOT belong here?
//!
//! - Session bookkeeping and message dispatch (that is the application layer)
//! - Event and configuration types (that is the domain layer)

pub mod config_file;
pub mod discovery;
pub mod mock_executor;
pub mod shell_executor;
pub mod ws_server;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use config_file::{load_file_config, ConfigError, FileConfig};
pub use discovery::ToolDiscovery;
pub use shell_executor::ShellExecutor;
pub use ws_server::{run_server, serve};
