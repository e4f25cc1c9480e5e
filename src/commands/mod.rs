pub mod planning;
pub mod telemetry;

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{error, warn};

use crate::config::PlannerConfig;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::services::planning_service::PlanningService;
use crate::services::task_service::TaskService;

#[derive(Clone)]
pub struct AppState {
    db_pool: DbPool,
    task_service: Arc<TaskService>,
    planning_service: Arc<PlanningService>,
}

impl AppState {
    pub fn new(db_pool: DbPool, config: PlannerConfig) -> AppResult<Self> {
        let planning_service = PlanningService::from_config(db_pool.clone(), config)?;
        Ok(Self::with_planning(db_pool, planning_service))
    }

    /// Opens (and migrates) the database at `db_path`.
    pub fn open(db_path: &Path, config: PlannerConfig) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let pool = DbPool::new(db_path)?;
        Self::new(pool, config)
    }

    pub fn with_planning(db_pool: DbPool, planning_service: PlanningService) -> Self {
        Self {
            task_service: Arc::new(TaskService::new(db_pool.clone())),
            planning_service: Arc::new(planning_service),
            db_pool,
        }
    }

    pub fn tasks(&self) -> Arc<TaskService> {
        Arc::clone(&self.task_service)
    }

    pub fn planning(&self) -> Arc<PlanningService> {
        Arc::clone(&self.planning_service)
    }

    pub fn db(&self) -> DbPool {
        self.db_pool.clone()
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

#[derive(Debug, Serialize)]
pub struct CommandError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl CommandError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<JsonValue>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details,
        }
    }
}

impl From<AppError> for CommandError {
    fn from(error: AppError) -> Self {
        match error {
            AppError::Validation {
                message, details, ..
            } => CommandError::new("VALIDATION_ERROR", message, details),
            AppError::NotFound => CommandError::new("NOT_FOUND", "请求的资源不存在", None),
            AppError::Conflict { message } => CommandError::new("CONFLICT", message, None),
            AppError::PlanSession { code, message } => {
                CommandError::new(code.as_str(), message, None)
            }
            AppError::Solver {
                code,
                message,
                details,
            } => {
                warn!(target: "app::command", code = %code, %message, "solver error in command");
                CommandError::new(code.as_str(), message, details)
            }
            AppError::CalendarSync(message) => {
                warn!(target: "app::command", %message, "calendar sync error in command");
                CommandError::new("UNKNOWN", message, None)
            }
            AppError::Database { message } => {
                error!(target: "app::command", %message, "database error in command");
                CommandError::new("UNKNOWN", message, None)
            }
            AppError::Serialization(error) => {
                error!(target: "app::command", error = %error, "serialization error in command");
                CommandError::new("UNKNOWN", "序列化失败", None)
            }
            AppError::Io(error) => {
                error!(target: "app::command", error = %error, "io error in command");
                CommandError::new("UNKNOWN", "文件系统读写失败", None)
            }
            AppError::Other(message) => {
                error!(target: "app::command", %message, "unexpected error in command");
                CommandError::new("UNKNOWN", message, None)
            }
        }
    }
}

pub(crate) async fn run_blocking<T: Send + 'static>(
    task: impl FnOnce() -> Result<T, AppError> + Send + 'static,
) -> CommandResult<T> {
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| CommandError::new("UNKNOWN", format!("任务执行失败: {err}"), None))?
        .map_err(CommandError::from)
}
