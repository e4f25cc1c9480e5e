use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyState {
    Applying,
    Recorded,
}

impl IdempotencyState {
    pub fn as_str(self) -> &'static str {
        match self {
            IdempotencyState::Applying => "applying",
            IdempotencyState::Recorded => "recorded",
        }
    }

    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw {
            "applying" => Ok(IdempotencyState::Applying),
            "recorded" => Ok(IdempotencyState::Recorded),
            other => Err(AppError::database(format!("未知的幂等状态: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub user_id: String,
    pub state: IdempotencyState,
    #[serde(default)]
    pub outcome_hash: Option<String>,
    #[serde(default)]
    pub outcome: Option<JsonValue>,
    pub created_at: String,
    pub updated_at: String,
}
