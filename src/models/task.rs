use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

pub const STATUS_DONE: &str = "done";
pub const DEFAULT_DURATION_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Energy {
    #[default]
    Deep,
    Light,
}

impl Energy {
    pub fn as_str(self) -> &'static str {
        match self {
            Energy::Deep => "deep",
            Energy::Light => "light",
        }
    }

    /// Unknown or missing labels fall back to deep work.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_ascii_lowercase()) {
            Some(value) if value == "light" => Energy::Light,
            _ => Energy::Deep,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub status: String,
    pub priority: String,
    pub energy: Energy,
    #[serde(default)]
    pub duration_min: Option<i64>,
    #[serde(default)]
    pub deadline_at: Option<String>,
    #[serde(default)]
    pub earliest_start_at: Option<String>,
    #[serde(default)]
    pub latest_end_at: Option<String>,
    #[serde(default)]
    pub hard_fixed: bool,
    #[serde(default)]
    pub location: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskRecord {
    pub fn effective_duration(&self) -> i64 {
        match self.duration_min {
            Some(minutes) if minutes > 0 => minutes,
            _ => DEFAULT_DURATION_MINUTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TaskCreateInput {
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub energy: Option<Energy>,
    #[serde(default)]
    pub duration_min: Option<i64>,
    #[serde(default)]
    pub deadline_at: Option<String>,
    #[serde(default)]
    pub earliest_start_at: Option<String>,
    #[serde(default)]
    pub latest_end_at: Option<String>,
    #[serde(default)]
    pub hard_fixed: bool,
    #[serde(default)]
    pub location: Option<String>,
}

/// Maps the categorical priority label onto a numeric weight in `[0, 1]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriorityScale {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
    pub unknown: f64,
}

impl Default for PriorityScale {
    fn default() -> Self {
        Self::backlog()
    }
}

impl PriorityScale {
    pub const fn backlog() -> Self {
        Self {
            high: 0.9,
            medium: 0.5,
            low: 0.1,
            unknown: 0.5,
        }
    }

    pub const fn planner() -> Self {
        Self {
            high: 0.9,
            medium: 0.6,
            low: 0.3,
            unknown: 0.5,
        }
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "backlog" => Some(Self::backlog()),
            "planner" => Some(Self::planner()),
            _ => None,
        }
    }

    pub fn weight(&self, label: &str) -> f64 {
        match label.trim().to_ascii_lowercase().as_str() {
            "high" => self.high,
            "medium" => self.medium,
            "low" => self.low,
            _ => self.unknown,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        let all = [self.high, self.medium, self.low, self.unknown];
        if all.iter().all(|weight| (0.0..=1.0).contains(weight)) {
            Ok(())
        } else {
            Err(AppError::validation("优先级权重必须位于 0 到 1 之间"))
        }
    }
}
