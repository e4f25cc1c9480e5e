use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixedEventRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub start_at: String,
    pub end_at: String,
    #[serde(default = "default_blocking")]
    pub is_blocking: bool,
    #[serde(default)]
    pub is_commute: bool,
    #[serde(default)]
    pub location: Option<String>,
}

fn default_blocking() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FixedEventCreateInput {
    pub user_id: String,
    pub title: String,
    pub start_at: String,
    pub end_at: String,
    #[serde(default)]
    pub is_blocking: Option<bool>,
    #[serde(default)]
    pub is_commute: bool,
    #[serde(default)]
    pub location: Option<String>,
}
