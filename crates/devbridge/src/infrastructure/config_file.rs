//! TOML configuration file for the device bridge.
//!
//! The file is optional and every field in it is optional.  It is an
//! *overlay*: values present in the file replace the built-in defaults of
//! [`BridgeConfig`], and CLI flags in `main.rs` are applied on top of that.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:9000"
//! path = "/device-bridge"
//! log_level = "debug"
//!
//! [terminal]
//! grace_delay_ms = 5000
//!
//! [logs]
//! poll_interval_ms = 1000
//! buffer_capacity = 10000
//! initial_tail_lines = 200
//!
//! [android]
//! shell = "adb -s {device} shell {command}"
//! screencap = "adb -s {device} exec-out screencap -p"
//! list_devices = "adb devices -l"
//!
//! [ios]
//! list_devices = ""          # empty string disables tool discovery
//!
//! [[devices]]
//! id = "emulator-5554"
//! platform = "android"
//! name = "Pixel emulator"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use devbridge_core::{DeviceInfo, Platform};

use crate::domain::config::{BridgeConfig, ToolTemplates};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field parsed as TOML but its value is not usable.
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// The on-disk schema.  Absent sections and fields leave the defaults alone.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: ServerSection,
    pub terminal: TerminalSection,
    pub logs: LogsSection,
    pub android: ToolSection,
    pub ios: ToolSection,
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub bind: Option<String>,
    pub path: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TerminalSection {
    pub grace_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LogsSection {
    pub poll_interval_ms: Option<u64>,
    pub buffer_capacity: Option<usize>,
    pub initial_tail_lines: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolSection {
    pub shell: Option<String>,
    pub screencap: Option<String>,
    /// An empty string turns tool discovery off for the platform.
    pub list_devices: Option<String>,
}

/// A device that discovery always reports.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DeviceEntry {
    pub id: String,
    pub platform: Platform,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Reads and parses the file at `path`.
///
/// # Errors
///
/// [`ConfigError::Io`] if the file cannot be read (a path given explicitly
/// must exist) and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

impl FileConfig {
    /// Overlays every value present in the file onto `config`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] for an unparseable bind address, a
    /// route path without a leading `/`, a zero poll interval or a zero
    /// buffer capacity.
    pub fn apply_to(self, config: &mut BridgeConfig) -> Result<(), ConfigError> {
        if let Some(bind) = self.server.bind {
            config.bind_addr = bind.parse::<SocketAddr>().map_err(|e| ConfigError::InvalidValue {
                field: "server.bind".to_string(),
                message: format!("'{bind}': {e}"),
            })?;
        }
        if let Some(path) = self.server.path {
            if !path.starts_with('/') {
                return Err(ConfigError::InvalidValue {
                    field: "server.path".to_string(),
                    message: format!("'{path}' must start with '/'"),
                });
            }
            config.route_path = path;
        }
        if let Some(level) = self.server.log_level {
            config.log_level = level;
        }

        if let Some(ms) = self.terminal.grace_delay_ms {
            config.terminal.grace_delay = Duration::from_millis(ms);
        }

        if let Some(ms) = self.logs.poll_interval_ms {
            if ms == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "logs.poll_interval_ms".to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
            config.logs.poll_interval = Duration::from_millis(ms);
        }
        if let Some(capacity) = self.logs.buffer_capacity {
            if capacity == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "logs.buffer_capacity".to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
            config.logs.buffer_capacity = capacity;
        }
        if let Some(lines) = self.logs.initial_tail_lines {
            config.logs.initial_tail_lines = lines;
        }

        self.android.apply_to(&mut config.android);
        self.ios.apply_to(&mut config.ios);

        config.devices.extend(self.devices.into_iter().map(|d| DeviceInfo {
            name: d.name.unwrap_or_else(|| d.id.clone()),
            state: d.state.unwrap_or_else(|| "device".to_string()),
            id: d.id,
            platform: d.platform,
        }));
        Ok(())
    }
}

impl ToolSection {
    fn apply_to(self, templates: &mut ToolTemplates) {
        if let Some(shell) = self.shell {
            templates.shell = shell;
        }
        if let Some(screencap) = self.screencap {
            templates.screencap = screencap;
        }
        if let Some(list) = self.list_devices {
            templates.list_devices = (!list.trim().is_empty()).then_some(list);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
