//! Inbound envelopes, direct replies, and broadcasts.
//!
//! # Why is `type` decoded as a string?
//!
//! An envelope with a well-formed shape but an unrecognised `type` must still
//! produce a correlated reply (`success: false`, keyed to its `requestId`).
//! Decoding `type` into an enum directly would turn that case into a decode
//! failure, which can only be answered against the sentinel id.  So the
//! envelope keeps the raw string and [`Envelope::message_type`] classifies it
//! afterwards.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

/// Request id used for replies to input that could not be decoded.
pub const UNKNOWN_REQUEST_ID: &str = "unknown";

/// Request id of the reply sent as soon as a connection is accepted.
pub const CONNECTION_REQUEST_ID: &str = "connection";

/// The envelope types the router dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Discovery,
    Terminal,
    Command,
    File,
    Permission,
    Screen,
    Log,
    AppInstallation,
}

impl MessageType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "discovery" => Some(MessageType::Discovery),
            "terminal" => Some(MessageType::Terminal),
            "command" => Some(MessageType::Command),
            "file" => Some(MessageType::File),
            "permission" => Some(MessageType::Permission),
            "screen" => Some(MessageType::Screen),
            "log" => Some(MessageType::Log),
            "app-installation" => Some(MessageType::AppInstallation),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Discovery => "discovery",
            MessageType::Terminal => "terminal",
            MessageType::Command => "command",
            MessageType::File => "file",
            MessageType::Permission => "permission",
            MessageType::Screen => "screen",
            MessageType::Log => "log",
            MessageType::AppInstallation => "app-installation",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
    pub request_id: String,
}

impl Envelope {
    /// Classifies `type`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownMessageType`] for anything outside the
    /// known set.
    pub fn message_type(&self) -> Result<MessageType, BridgeError> {
        MessageType::parse(&self.kind)
            .ok_or_else(|| BridgeError::UnknownMessageType(self.kind.clone()))
    }

    /// The `payload.action` string.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidPayload`] when `action` is missing or is
    /// not a string.
    pub fn action(&self) -> Result<&str, BridgeError> {
        self.payload
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::InvalidPayload("payload.action is required".to_string()))
    }

    /// Deserializes the payload's action arguments into `T`.
    ///
    /// The `action` key itself is ignored by `T` unless `T` declares it.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidPayload`] with the serde message when the
    /// payload does not fit `T`.
    pub fn args<T: DeserializeOwned>(&self) -> Result<T, BridgeError> {
        let payload = if self.payload.is_null() {
            Value::Object(Default::default())
        } else {
            self.payload.clone()
        };
        serde_json::from_value(payload).map_err(|e| BridgeError::InvalidPayload(e.to_string()))
    }

    /// The `deviceId`, required by session-creating and device-level actions.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MissingDeviceId`] when absent or empty.
    pub fn require_device_id(&self) -> Result<&str, BridgeError> {
        match self.device_id.as_deref() {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(BridgeError::MissingDeviceId(self.kind.clone())),
        }
    }
}

/// Decodes one text frame into an [`Envelope`].
///
/// # Errors
///
/// Returns [`BridgeError::MalformedEnvelope`] for invalid JSON or a JSON
/// value without the envelope shape.
pub fn decode_envelope(text: &str) -> Result<Envelope, BridgeError> {
    serde_json::from_str(text).map_err(|e| BridgeError::MalformedEnvelope(e.to_string()))
}

/// A direct reply to one request, correlated by `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub request_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn ok(request_id: impl Into<String>, data: Value) -> Self {
        Self {
            request_id: request_id.into(),
            success: true,
            data: if data.is_null() { None } else { Some(data) },
            error: None,
        }
    }

    pub fn err(request_id: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

/// A server-initiated message to every connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Broadcast {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

impl Broadcast {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
