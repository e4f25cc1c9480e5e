use std::fs;
use std::path::Path;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::models::task::PriorityScale;

const DEFAULT_SOLVER_URL: &str = "http://127.0.0.1:8001";
const DEFAULT_SOLVER_TIMEOUT_SECS: u64 = 10;
const DEFAULT_FALLBACK_TOP_N: usize = 10;
const DEFAULT_SESSION_TTL_SECS: i64 = 5 * 60;
const DEFAULT_SESSION_CAPACITY: usize = 1024;

/// Runtime configuration for the planning core.
///
/// Resolution order: built-in defaults, then an optional YAML file, then
/// `DAYSHAPE_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerConfig {
    pub solver_base_url: String,
    pub solver_timeout: StdDuration,
    pub fallback_top_n: usize,
    pub session_ttl: Duration,
    pub session_capacity: usize,
    pub calendar_sync_enabled: bool,
    pub calendar_sync_url: Option<String>,
    pub priority_scale: PriorityScale,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            solver_base_url: DEFAULT_SOLVER_URL.to_string(),
            solver_timeout: StdDuration::from_secs(DEFAULT_SOLVER_TIMEOUT_SECS),
            fallback_top_n: DEFAULT_FALLBACK_TOP_N,
            session_ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECS),
            session_capacity: DEFAULT_SESSION_CAPACITY,
            calendar_sync_enabled: false,
            calendar_sync_url: None,
            priority_scale: PriorityScale::backlog(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PlannerConfigFile {
    solver_url: Option<String>,
    solver_timeout_secs: Option<u64>,
    fallback_top_n: Option<usize>,
    session_ttl_secs: Option<i64>,
    session_capacity: Option<usize>,
    calendar_sync_enabled: Option<bool>,
    calendar_sync_url: Option<String>,
    priority_scale: Option<PriorityScaleSetting>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PriorityScaleSetting {
    Preset(String),
    Table(PriorityScale),
}

impl PlannerConfig {
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_yaml_file(path)?,
            Some(path) => {
                warn!(target: "app::config", path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> AppResult<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> AppResult<Self> {
        let file: PlannerConfigFile = serde_yaml::from_str(raw)
            .map_err(|err| AppError::validation(format!("配置文件解析失败: {err}")))?;

        let mut config = Self::default();
        if let Some(url) = file.solver_url {
            config.solver_base_url = url;
        }
        if let Some(secs) = file.solver_timeout_secs {
            config.solver_timeout = StdDuration::from_secs(secs);
        }
        if let Some(top_n) = file.fallback_top_n {
            config.fallback_top_n = top_n;
        }
        if let Some(secs) = file.session_ttl_secs {
            config.session_ttl = Duration::seconds(secs);
        }
        if let Some(capacity) = file.session_capacity {
            config.session_capacity = capacity;
        }
        if let Some(enabled) = file.calendar_sync_enabled {
            config.calendar_sync_enabled = enabled;
        }
        config.calendar_sync_url = file.calendar_sync_url.or(config.calendar_sync_url);
        if let Some(setting) = file.priority_scale {
            config.priority_scale = match setting {
                PriorityScaleSetting::Preset(name) => PriorityScale::preset(&name)
                    .ok_or_else(|| AppError::validation(format!("未知的优先级映射: {name}")))?,
                PriorityScaleSetting::Table(table) => table,
            };
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("DAYSHAPE_SOLVER_URL") {
            self.solver_base_url = url;
        }
        if let Some(secs) = env_parse::<u64>("DAYSHAPE_SOLVER_TIMEOUT_SECS") {
            self.solver_timeout = StdDuration::from_secs(secs);
        }
        if let Some(top_n) = env_parse::<usize>("DAYSHAPE_FALLBACK_TOP_N") {
            self.fallback_top_n = top_n;
        }
        if let Some(secs) = env_parse::<i64>("DAYSHAPE_SESSION_TTL_SECS") {
            self.session_ttl = Duration::seconds(secs);
        }
        if let Some(enabled) = env_parse::<bool>("DAYSHAPE_CALENDAR_SYNC_ENABLED") {
            self.calendar_sync_enabled = enabled;
        }
        if let Ok(url) = std::env::var("DAYSHAPE_CALENDAR_SYNC_URL") {
            let trimmed = url.trim();
            if !trimmed.is_empty() {
                self.calendar_sync_url = Some(trimmed.to_string());
            }
        }
        if let Ok(name) = std::env::var("DAYSHAPE_PRIORITY_SCALE") {
            match PriorityScale::preset(&name) {
                Some(scale) => self.priority_scale = scale,
                None => {
                    warn!(target: "app::config", preset = %name, "unknown priority scale preset, keeping current");
                }
            }
        }
        debug!(target: "app::config", solver = %self.solver_base_url, "planner configuration resolved");
    }

    fn validate(&self) -> AppResult<()> {
        if self.solver_base_url.trim().is_empty() {
            return Err(AppError::validation("求解器地址不能为空"));
        }
        if self.solver_timeout.is_zero() {
            return Err(AppError::validation("求解器超时时间必须大于 0"));
        }
        if self.session_ttl <= Duration::zero() {
            return Err(AppError::validation("规划会话有效期必须大于 0"));
        }
        if self.session_capacity == 0 {
            return Err(AppError::validation("规划会话容量必须大于 0"));
        }
        self.priority_scale.validate()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(target: "app::config", variable = name, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}
