//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! It starts from [`BridgeConfig::default`], is overlaid by an optional TOML
//! file (see `infrastructure::config_file`), and finally by CLI flags in
//! `main.rs`.
//!
//! # Command templates
//!
//! The bridge reaches devices through host tools (adb, libimobiledevice,
//! ssh).  Which tool and which arguments are used is configured as a template
//! string such as:
//!
//! ```text
//! adb -s {device} shell {command}
//! ```
//!
//! The template is split on whitespace into an argv list, then `{device}` and
//! `{command}` are substituted *inside* their argument.  The device command is
//! therefore always exactly one argv entry no matter how many spaces it
//! contains.

use std::net::SocketAddr;
use std::time::Duration;

use devbridge_core::domain::log::LOG_BUFFER_CAPACITY;
use devbridge_core::DeviceInfo;

/// Host-tool command templates for one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolTemplates {
    /// Runs one shell command on the device.  Placeholders: `{device}`, `{command}`.
    pub shell: String,
    /// Writes one encoded screen frame to stdout.  Placeholder: `{device}`.
    pub screencap: String,
    /// Lists attached devices, one per line.  `None` disables tool discovery.
    pub list_devices: Option<String>,
}

impl ToolTemplates {
    pub fn android_defaults() -> Self {
        Self {
            shell: "adb -s {device} shell {command}".to_string(),
            screencap: "adb -s {device} exec-out screencap -p".to_string(),
            list_devices: Some("adb devices -l".to_string()),
        }
    }

    /// iOS shell access assumes an ssh host alias per device UDID (for
    /// example through `iproxy` and an `~/.ssh/config` entry).
    pub fn ios_defaults() -> Self {
        Self {
            shell: "ssh -o BatchMode=yes mobile@{device} {command}".to_string(),
            screencap: "idevicescreenshot -u {device} /dev/stdout".to_string(),
            list_devices: Some("idevice_id -l".to_string()),
        }
    }
}

/// Terminal session manager settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSettings {
    /// How long a closed session stays in the registry before removal.
    pub grace_delay: Duration,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            grace_delay: Duration::from_secs(5),
        }
    }
}

/// Log capture manager settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Period of the ingestion loop.
    pub poll_interval: Duration,
    /// Ring buffer capacity per session.
    pub buffer_capacity: usize,
    /// Number of recent lines fetched on a session's first poll.
    pub initial_tail_lines: u32,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            buffer_capacity: LOG_BUFFER_CAPACITY,
            initial_tail_lines: 200,
        }
    }
}

/// All runtime configuration for the device bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// The address and port the WebSocket server binds to.
    pub bind_addr: SocketAddr,

    /// URL path the bridge endpoint is served on.  Upgrades on any other
    /// path are rejected with 404.
    pub route_path: String,

    /// Default `tracing` filter when `RUST_LOG` is not set.
    pub log_level: String,

    pub terminal: TerminalSettings,
    pub logs: LogSettings,
    pub android: ToolTemplates,
    pub ios: ToolTemplates,

    /// Devices that are always reported by discovery, in addition to any
    /// the host tools list.
    pub devices: Vec<DeviceInfo>,
}

impl Default for BridgeConfig {
    /// | Field        | Default             |
    /// |--------------|---------------------|
    /// | bind_addr    | `0.0.0.0:8081`      |
    /// | route_path   | `/device-bridge`    |
    /// | log_level    | `info`              |
    /// | grace delay  | 5 seconds           |
    /// | log poll     | 1 second            |
    /// | log capacity | 10,000 entries      |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            route_path: "/device-bridge".to_string(),
            log_level: "info".to_string(),
            terminal: TerminalSettings::default(),
            logs: LogSettings::default(),
            android: ToolTemplates::android_defaults(),
            ios: ToolTemplates::ios_defaults(),
            devices: Vec::new(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
