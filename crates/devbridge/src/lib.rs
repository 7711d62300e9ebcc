//! devbridge library crate.
//!
//! A real-time bridge between browser clients and Android/iOS devices
//! attached to the host.  One WebSocket connection carries terminal, screen
//! capture and log capture sessions plus one-shot device operations, framed
//! as JSON envelopes (see `devbridge_core::protocol`).
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser (JSON over WebSocket)
//!         ↕
//! [devbridge]
//!   ├── domain/           Pure types: BridgeConfig, manager events
//!   ├── application/      Router, session managers, log parsing, ticker
//!   └── infrastructure/
//!         ├── ws_server/       WebSocket accept loop (tokio-tungstenite)
//!         ├── shell_executor/  Host tools as child processes (tokio::process)
//!         ├── discovery/       adb / idevice_id device listing
//!         └── config_file/     TOML overlay (serde + toml)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `devbridge-core`; it reaches
//!   devices only through the `DeviceExecutor` trait, so every manager can be
//!   tested with an in-memory executor and a paused clock.
//! - `infrastructure` depends on all other layers plus `tokio`,
//!   `tokio-tungstenite` and the host tools.

/// Domain layer: configuration and event types (no I/O).
pub mod domain;

/// Application layer: session managers and message routing.
pub mod application;

/// Infrastructure layer: WebSocket server, host-tool executor, config file.
pub mod infrastructure;
