//! Wire types and validation for the Capacitor relay channel.
//!
//! This crate is shared by the desktop engine and any paired device to prevent
//! schema drift. It only describes JSON shapes; sealing and opening the `state`
//! payload is the caller's job.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_ENVELOPE_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    StateUpdate,
    Hello,
    Ping,
    Pong,
    Command,
    Heartbeat,
}

/// Sealed snapshot. Both fields are base64 (standard alphabet, padded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedState {
    pub nonce: String,
    pub ciphertext: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub project: String,
    pub timestamp: String,
}

impl Heartbeat {
    pub fn new(project: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            project: project.into(),
            timestamp: at.to_rfc3339(),
        }
    }

    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<EncryptedState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<Heartbeat>,
}

impl Envelope {
    fn bare(kind: MessageType) -> Self {
        Self {
            kind,
            state: None,
            device_id: None,
            heartbeat: None,
        }
    }

    pub fn hello(device_id: &str) -> Self {
        Self {
            device_id: Some(device_id.to_string()),
            ..Self::bare(MessageType::Hello)
        }
    }

    pub fn ping() -> Self {
        Self::bare(MessageType::Ping)
    }

    pub fn pong() -> Self {
        Self::bare(MessageType::Pong)
    }

    pub fn state_update(device_id: &str, state: EncryptedState) -> Self {
        Self {
            state: Some(state),
            device_id: Some(device_id.to_string()),
            ..Self::bare(MessageType::StateUpdate)
        }
    }

    pub fn heartbeat(device_id: &str, heartbeat: Heartbeat) -> Self {
        Self {
            device_id: Some(device_id.to_string()),
            heartbeat: Some(heartbeat),
            ..Self::bare(MessageType::Heartbeat)
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        match self.kind {
            MessageType::StateUpdate => {
                let state = self
                    .state
                    .as_ref()
                    .ok_or_else(|| ErrorInfo::new("missing_state", "state_update requires state"))?;
                if state.nonce.trim().is_empty() || state.ciphertext.trim().is_empty() {
                    return Err(ErrorInfo::new(
                        "invalid_state",
                        "state nonce and ciphertext must be non-empty",
                    ));
                }
            }
            MessageType::Heartbeat => {
                let heartbeat = self.heartbeat.as_ref().ok_or_else(|| {
                    ErrorInfo::new("missing_heartbeat", "heartbeat requires heartbeat")
                })?;
                if heartbeat.project.trim().is_empty() {
                    return Err(ErrorInfo::new(
                        "invalid_heartbeat",
                        "heartbeat project is required",
                    ));
                }
                if heartbeat.parsed_timestamp().is_none() {
                    return Err(ErrorInfo::new(
                        "invalid_heartbeat",
                        "heartbeat timestamp must be RFC3339",
                    ));
                }
            }
            MessageType::Hello => {
                if self
                    .device_id
                    .as_deref()
                    .map_or(true, |id| id.trim().is_empty())
                {
                    return Err(ErrorInfo::new("invalid_hello", "hello requires deviceId"));
                }
            }
            MessageType::Ping | MessageType::Pong | MessageType::Command => {}
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, ErrorInfo> {
        serde_json::to_string(self)
            .map_err(|err| ErrorInfo::new("serialize_failed", err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorInfo {}

/// Parses and validates one inbound frame.
pub fn parse_envelope(text: &str) -> Result<Envelope, ErrorInfo> {
    if text.len() > MAX_ENVELOPE_BYTES {
        return Err(ErrorInfo::new(
            "envelope_too_large",
            format!("envelope exceeds {} bytes", MAX_ENVELOPE_BYTES),
        ));
    }
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|err| ErrorInfo::new("invalid_json", err.to_string()))?;
    envelope.validate()?;
    Ok(envelope)
}

// -----------------------------------------------------------------------------
// Decrypted payload
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteState {
    Idle,
    Ready,
    Working,
    Waiting,
    Compacting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteProjectState {
    pub state: RemoteState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
    /// Peers may send fractional percentages; they are rounded and clamped to 0..=100.
    #[serde(
        default,
        deserialize_with = "deserialize_percent",
        skip_serializing_if = "Option::is_none"
    )]
    pub context_percent: Option<u8>,
    pub last_updated: String,
}

impl RemoteProjectState {
    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.last_updated)
    }
}

/// Project path → state. Ordered so the serialized form is stable.
pub type RemoteSnapshot = BTreeMap<String, RemoteProjectState>;

/// A decoded snapshot plus the projects whose entries did not fit the schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSnapshot {
    pub projects: RemoteSnapshot,
    /// `(project path, reason)` for every entry that was dropped.
    pub rejected: Vec<(String, String)>,
}

/// Decodes a snapshot one project at a time. Only a payload that is not a JSON
/// object at all is an error; a malformed entry drops just that project.
pub fn parse_snapshot(bytes: &[u8]) -> Result<ParsedSnapshot, ErrorInfo> {
    let raw: BTreeMap<String, Value> = serde_json::from_slice(bytes)
        .map_err(|err| ErrorInfo::new("invalid_snapshot", err.to_string()))?;

    let mut parsed = ParsedSnapshot::default();
    for (path, value) in raw {
        match serde_json::from_value::<RemoteProjectState>(value) {
            Ok(state) => {
                parsed.projects.insert(path, state);
            }
            Err(err) => parsed.rejected.push((path, err.to_string())),
        }
    }
    Ok(parsed)
}

fn deserialize_percent<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value
        .filter(|v| v.is_finite())
        .map(|v| v.round().clamp(0.0, 100.0) as u8))
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
