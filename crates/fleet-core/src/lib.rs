use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub mod protocol;

pub use protocol::{
    decode_frame, encode_frame, topics, Envelope, ErrorPayload, FrameError, SubscribeAckPayload,
    SubscribeLogsPayload, TaskLogData, DEFAULT_MAX_FRAME_BYTES,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    /// Agents emit free-form level text; anything unrecognised is shown as info.
    pub fn from_lenient(input: &str) -> Self {
        input.parse().unwrap_or_default()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" | "fatal" => Ok(LogLevel::Error),
            other => Err(format!("Unknown log level: {other}")),
        }
    }
}

impl Serialize for LogLevel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(LogLevel::from_lenient(&raw))
    }
}

/// One log line as received by a stream session. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    /// 1-based position in the session buffer.
    pub seq: u64,
    pub task_id: String,
    pub level: LogLevel,
    pub message: String,
    /// Server clock, epoch seconds.
    pub emitted_at: i64,
}

impl LogEntry {
    pub fn from_wire(seq: u64, data: TaskLogData) -> Self {
        Self {
            seq,
            task_id: data.task_id,
            level: data.level,
            message: data.message,
            emitted_at: data.emitted_at,
        }
    }
}

/// Deserialize an ID that can be either a string or a number into a String
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val: serde_json::Value = serde_json::Value::deserialize(deserializer)?;
    match val {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parsing_is_case_insensitive_with_aliases() {
        assert_eq!("WARNING".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert_eq!(" Error ".parse::<LogLevel>(), Ok(LogLevel::Error));
        assert_eq!("debug".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        let level: LogLevel = serde_json::from_str("\"notice\"").expect("parse level");
        assert_eq!(level, LogLevel::Info);
        assert_eq!(level.label(), "INFO");
    }

    #[test]
    fn entry_keeps_wire_fields() {
        let data = TaskLogData {
            task_id: "t1".to_string(),
            level: LogLevel::Warn,
            message: "disk almost full".to_string(),
            emitted_at: 1_000,
        };
        let entry = LogEntry::from_wire(3, data);
        assert_eq!(entry.seq, 3);
        assert_eq!(entry.task_id, "t1");
        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.emitted_at, 1_000);
    }
}
