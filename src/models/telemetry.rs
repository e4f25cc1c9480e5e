use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryKind {
    BlockMoved,
    TaskCompleted,
    LatenessObserved,
    Other(String),
}

impl TelemetryKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "block_moved" | "user_moved_block" | "block_moved_by_user" => TelemetryKind::BlockMoved,
            "task_completed" => TelemetryKind::TaskCompleted,
            "lateness_observed" | "lateness" => TelemetryKind::LatenessObserved,
            _ => TelemetryKind::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TelemetryKind::BlockMoved => "block_moved",
            TelemetryKind::TaskCompleted => "task_completed",
            TelemetryKind::LatenessObserved => "lateness_observed",
            TelemetryKind::Other(raw) => raw.as_str(),
        }
    }
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TelemetryKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TelemetryKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(TelemetryKind::parse(&raw))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryEvent {
    pub id: String,
    pub user_id: String,
    pub kind: TelemetryKind,
    pub payload: JsonValue,
    pub occurred_at: String,
}
