//! Error taxonomy shared by every session manager and the router.
//!
//! These are logic failures.  The router converts each one into a reply
//! envelope with `success: false` and the `Display` text as `error`; none of
//! them ever closes the client connection.
//!
//! A device command that exits non-zero is *not* an error: its exit code is
//! returned as data inside a successful reply.

use thiserror::Error;

use crate::executor::ExecutorError;

/// Errors returned by the bridge's managers and dispatch layer.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No session with this id exists in the owning manager.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The session exists but has been closed.
    #[error("session is not active: {0}")]
    SessionInactive(String),

    /// A screen capture is already running for this device.
    #[error("screen capture already active for device {0}")]
    CaptureAlreadyActive(String),

    /// A command is already in flight for this terminal session.
    #[error("a command is already running in session {0}")]
    CommandInProgress(String),

    /// The inbound text could not be decoded as an envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The envelope `type` is not one the bridge handles.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// The `payload.action` is not valid for the envelope type.
    #[error("unknown action '{action}' for message type '{message_type}'")]
    UnknownAction {
        message_type: String,
        action: String,
    },

    /// The payload is missing a field or has a field of the wrong shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The envelope type requires a `deviceId` and none was supplied.
    #[error("deviceId is required for '{0}' messages")]
    MissingDeviceId(String),

    /// The operation has no implementation on the requested platform.
    #[error("operation '{operation}' is not supported on {platform}")]
    UnsupportedPlatform {
        operation: String,
        platform: String,
    },

    /// The device executor failed outside of a terminal session.
    #[error("device error: {0}")]
    Device(#[from] ExecutorError),
}

impl BridgeError {
    pub fn unknown_action(message_type: &str, action: &str) -> Self {
        BridgeError::UnknownAction {
            message_type: message_type.to_string(),
            action: action.to_string(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
