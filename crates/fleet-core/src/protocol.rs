use crate::{deserialize_id, LogLevel};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Matches the read limit the cloud server applies to each socket message.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 512 * 1024;

pub mod topics {
    pub const TASK_LOG: &str = "task.log";
    pub const TASK_SUBSCRIBE_LOGS: &str = "task.subscribe_logs";
    pub const ERROR: &str = "error";
}

/// Outer wire message. `kind` selects the topic, `timestamp` is the send time
/// of the envelope itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    #[serde(default)]
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
}

impl Envelope {
    pub fn new(kind: &str, data: Value) -> Self {
        Self {
            kind: kind.to_string(),
            id: None,
            request_id: None,
            data,
            error: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Builds the request asking the server to stream (and replay) logs for a task.
    pub fn subscribe_logs(task_id: &str) -> Self {
        let payload = SubscribeLogsPayload {
            task_id: task_id.to_string(),
        };
        Self {
            request_id: Some(uuid::Uuid::new_v4().to_string()),
            // A single string field always serializes.
            ..Self::new(
                topics::TASK_SUBSCRIBE_LOGS,
                serde_json::to_value(&payload).unwrap_or_default(),
            )
        }
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        T::deserialize(&self.data).map_err(|err| FrameError::Payload {
            kind: self.kind.clone(),
            reason: err.to_string(),
        })
    }

    /// Task id carried in `data`, if any, without decoding the full payload.
    pub fn task_id(&self) -> Option<&str> {
        self.data
            .get("task_id")
            .or_else(|| self.data.get("taskId"))
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskLogData {
    #[serde(alias = "taskId", deserialize_with = "deserialize_id")]
    pub task_id: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(rename = "timestamp", alias = "emittedAt")]
    pub emitted_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeLogsPayload {
    pub task_id: String,
}

/// Server reply once the history replay for a subscribe has been sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeAckPayload {
    #[serde(alias = "taskId", deserialize_with = "deserialize_id")]
    pub task_id: String,
    #[serde(default)]
    pub status: String,
}

impl SubscribeAckPayload {
    pub const SUBSCRIBED: &'static str = "subscribed";

    pub fn is_subscribed(&self) -> bool {
        self.status == Self::SUBSCRIBED
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    pub message: String,
    pub request_id: Option<String>,
}

impl ErrorPayload {
    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        if !envelope.is(topics::ERROR) {
            return None;
        }
        let message = envelope
            .error
            .clone()
            .or_else(|| envelope.data.as_str().map(str::to_string))
            .unwrap_or_else(|| "unknown server error".to_string());
        Some(Self {
            message,
            request_id: envelope.request_id.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("invalid {kind} payload: {reason}")]
    Payload { kind: String, reason: String },
}

pub fn encode_frame(envelope: &Envelope, max_frame_bytes: usize) -> Result<String, FrameError> {
    let encoded =
        serde_json::to_string(envelope).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_frame(text: &str, max_frame_bytes: usize) -> Result<Envelope, FrameError> {
    let raw = text.trim_end_matches(['\r', '\n']);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_str(raw).map_err(|err| FrameError::Decode(err.to_string()))
}
