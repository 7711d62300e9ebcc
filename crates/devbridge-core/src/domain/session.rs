//! Session identity and the fields every session variant shares.
//!
//! A *session* is a stateful, device-scoped unit of work with an explicit
//! create/close lifecycle.  The bridge has three kinds (terminal, screen
//! capture, log capture); each is owned by exactly one manager and embeds a
//! [`SessionInfo`] for the common fields.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique, generated identifier of a session (for example `term-6f1c…`).
pub type SessionId = String;

/// Identifier of a physical or emulated device (an adb serial or an iOS UDID).
pub type DeviceId = String;

/// The device platform a session targets.
///
/// Serialised in lowercase (`"android"`, `"ios"`) to match the envelope
/// protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    /// The directory a new terminal session starts in.
    ///
    /// | Platform | Directory     |
    /// |----------|---------------|
    /// | android  | `/sdcard`     |
    /// | ios      | `/var/mobile` |
    pub fn default_working_directory(self) -> &'static str {
        match self {
            Platform::Android => "/sdcard",
            Platform::Ios => "/var/mobile",
        }
    }

    /// The shell binary reported for terminal sessions on this platform.
    pub fn default_shell(self) -> &'static str {
        match self {
            Platform::Android => "/system/bin/sh",
            Platform::Ios => "/bin/sh",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            other => Err(format!("unknown platform '{other}'")),
        }
    }
}

/// Fields shared by every session variant.
///
/// Session types embed this with `#[serde(flatten)]` so the JSON shape is a
/// single flat object: `{"sessionId":…, "deviceId":…, "platform":…, …}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub device_id: DeviceId,
    pub platform: Platform,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl SessionInfo {
    /// Creates an active session record with a freshly generated id.
    ///
    /// `prefix` names the session kind (`"term"`, `"screen"`, `"log"`) so ids
    /// are recognisable in logs.
    pub fn new(prefix: &str, device_id: impl Into<DeviceId>, platform: Platform) -> Self {
        Self {
            session_id: generate_session_id(prefix),
            device_id: device_id.into(),
            platform,
            created_at: Utc::now(),
            is_active: true,
        }
    }
}

/// Generates a unique session id of the form `<prefix>-<uuid v4>`.
pub fn generate_session_id(prefix: &str) -> SessionId {
    format!("{prefix}-{}", Uuid::new_v4())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
