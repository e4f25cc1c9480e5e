use chrono::{DateTime, FixedOffset};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{AppError, AppResult};

pub const DEFAULT_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Task,
    Buffer,
}

impl BlockType {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockType::Task => "task",
            BlockType::Buffer => "buffer",
        }
    }

    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw {
            "task" => Ok(BlockType::Task),
            "buffer" => Ok(BlockType::Buffer),
            other => Err(AppError::validation(format!("未知的时间块类型: {other}"))),
        }
    }
}

/// A block occupying work time for a specific task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskBlock {
    #[serde(deserialize_with = "string_or_number")]
    pub task_id: String,
    pub title: String,
    #[serde(alias = "start", alias = "start_dt")]
    pub start_at: DateTime<FixedOffset>,
    #[serde(alias = "end", alias = "end_dt")]
    pub end_at: DateTime<FixedOffset>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A gap inserted between blocks. Carries no task reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BufferBlock {
    pub title: String,
    #[serde(alias = "start", alias = "start_dt")]
    pub start_at: DateTime<FixedOffset>,
    #[serde(alias = "end", alias = "end_dt")]
    pub end_at: DateTime<FixedOffset>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Serialized with an explicit `block_type` tag. On input the tag may be
/// omitted: a block with a `task_id` is a task block, one without is a buffer.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "block_type", rename_all = "snake_case")]
pub enum ProposedBlock {
    Task(TaskBlock),
    Buffer(BufferBlock),
}

#[derive(Deserialize)]
struct RawProposedBlock {
    #[serde(default)]
    block_type: Option<BlockType>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    task_id: Option<String>,
    title: String,
    #[serde(alias = "start", alias = "start_dt")]
    start_at: DateTime<FixedOffset>,
    #[serde(alias = "end", alias = "end_dt")]
    end_at: DateTime<FixedOffset>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reason: Option<String>,
}

impl<'de> Deserialize<'de> for ProposedBlock {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawProposedBlock::deserialize(deserializer)?;
        let confidence = raw.confidence.unwrap_or(DEFAULT_CONFIDENCE);
        let block_type = raw.block_type.unwrap_or(if raw.task_id.is_some() {
            BlockType::Task
        } else {
            BlockType::Buffer
        });

        match (block_type, raw.task_id) {
            (BlockType::Task, Some(task_id)) => Ok(ProposedBlock::Task(TaskBlock {
                task_id,
                title: raw.title,
                start_at: raw.start_at,
                end_at: raw.end_at,
                confidence,
                reason: raw.reason,
            })),
            (BlockType::Task, None) => Err(de::Error::missing_field("task_id")),
            (BlockType::Buffer, _) => Ok(ProposedBlock::Buffer(BufferBlock {
                title: raw.title,
                start_at: raw.start_at,
                end_at: raw.end_at,
                confidence,
                reason: raw.reason,
            })),
        }
    }
}

impl ProposedBlock {
    pub fn block_type(&self) -> BlockType {
        match self {
            ProposedBlock::Task(_) => BlockType::Task,
            ProposedBlock::Buffer(_) => BlockType::Buffer,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            ProposedBlock::Task(block) => Some(block.task_id.as_str()),
            ProposedBlock::Buffer(_) => None,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            ProposedBlock::Task(block) => &block.title,
            ProposedBlock::Buffer(block) => &block.title,
        }
    }

    pub fn start_at(&self) -> DateTime<FixedOffset> {
        match self {
            ProposedBlock::Task(block) => block.start_at,
            ProposedBlock::Buffer(block) => block.start_at,
        }
    }

    pub fn end_at(&self) -> DateTime<FixedOffset> {
        match self {
            ProposedBlock::Task(block) => block.end_at,
            ProposedBlock::Buffer(block) => block.end_at,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            ProposedBlock::Task(block) => block.confidence,
            ProposedBlock::Buffer(block) => block.confidence,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ProposedBlock::Task(block) => block.reason.as_deref(),
            ProposedBlock::Buffer(block) => block.reason.as_deref(),
        }
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_at() - self.start_at()).num_minutes()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommittedBlock {
    pub id: String,
    pub user_id: String,
    pub plan_date: String,
    #[serde(default)]
    pub task_id: Option<String>,
    pub block_type: BlockType,
    pub title: String,
    pub start_at: DateTime<FixedOffset>,
    pub end_at: DateTime<FixedOffset>,
    pub confidence: f64,
    #[serde(default)]
    pub reason: Option<String>,
    pub idempotency_key: String,
    pub created_at: String,
}

impl CommittedBlock {
    pub fn is_buffer(&self) -> bool {
        self.block_type == BlockType::Buffer
    }
}

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

/// Accepts identifiers sent either as JSON strings or as integers.
pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::String(value) => Ok(value),
        JsonValue::Number(value) => Ok(value.to_string()),
        other => Err(de::Error::custom(format!(
            "expected string or number identifier, got {other}"
        ))),
    }
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<JsonValue>::deserialize(deserializer)? {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(value)) => Ok(Some(value)),
        Some(JsonValue::Number(value)) => Ok(Some(value.to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "expected string or number identifier, got {other}"
        ))),
    }
}
