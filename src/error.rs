use std::fmt;

use rusqlite;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, warn};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverErrorCode {
    HttpTimeout,
    Unreachable,
    UpstreamStatus,
    InvalidResponse,
    Rejected,
    Unknown,
}

impl SolverErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            SolverErrorCode::HttpTimeout => "HTTP_TIMEOUT",
            SolverErrorCode::Unreachable => "SOLVER_UNREACHABLE",
            SolverErrorCode::UpstreamStatus => "SOLVER_STATUS",
            SolverErrorCode::InvalidResponse => "INVALID_RESPONSE",
            SolverErrorCode::Rejected => "SOLVER_REJECTED",
            SolverErrorCode::Unknown => "UNKNOWN_SOLVER_ERROR",
        }
    }
}

impl fmt::Display for SolverErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSessionErrorCode {
    Missing,
    Expired,
}

impl PlanSessionErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanSessionErrorCode::Missing => "PLAN_SESSION_MISSING",
            PlanSessionErrorCode::Expired => "PLAN_SESSION_EXPIRED",
        }
    }
}

impl fmt::Display for PlanSessionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("数据库错误: {message}")]
    Database { message: String },

    #[error("记录未找到")]
    NotFound,

    #[error("记录冲突: {message}")]
    Conflict { message: String },

    #[error("验证失败: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        details: Option<JsonValue>,
    },

    #[error("{message}")]
    Solver {
        code: SolverErrorCode,
        message: String,
        details: Option<JsonValue>,
    },

    #[error("{message}")]
    PlanSession {
        code: PlanSessionErrorCode,
        message: String,
    },

    #[error("日历同步失败: {0}")]
    CalendarSync(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "app::validation", %message, "validation error");
        AppError::Validation {
            message,
            source: None,
            details: None,
        }
    }

    pub fn validation_with_details(message: impl Into<String>, details: JsonValue) -> Self {
        let message = message.into();
        warn!(target: "app::validation", %message, details = %details, "validation error with details");
        AppError::Validation {
            message,
            source: None,
            details: Some(details),
        }
    }

    pub fn solver(code: SolverErrorCode, message: impl Into<String>) -> Self {
        Self::solver_with_details(code, message, None)
    }

    pub fn solver_with_details(
        code: SolverErrorCode,
        message: impl Into<String>,
        details: Option<JsonValue>,
    ) -> Self {
        let message = message.into();
        match &details {
            Some(payload) => {
                warn!(target: "app::solver::error", code = %code, details = %payload, %message);
            }
            None => {
                warn!(target: "app::solver::error", code = %code, %message);
            }
        }

        AppError::Solver {
            code,
            message,
            details,
        }
    }

    pub fn solver_code(&self) -> Option<SolverErrorCode> {
        match self {
            AppError::Solver { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_solver_unavailable(&self) -> bool {
        matches!(self, AppError::Solver { .. })
    }

    pub fn session_missing() -> Self {
        let message = "当前用户没有可应用的规划，请重新生成计划".to_string();
        warn!(target: "app::apply", code = %PlanSessionErrorCode::Missing, "plan session missing");
        AppError::PlanSession {
            code: PlanSessionErrorCode::Missing,
            message,
        }
    }

    pub fn session_expired() -> Self {
        let message = "规划已过期，请重新生成计划".to_string();
        warn!(target: "app::apply", code = %PlanSessionErrorCode::Expired, "plan session expired");
        AppError::PlanSession {
            code: PlanSessionErrorCode::Expired,
            message,
        }
    }

    pub fn session_code(&self) -> Option<PlanSessionErrorCode> {
        match self {
            AppError::PlanSession { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Errors the caller caused; no state was mutated when one of these is returned.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::Validation { .. }
                | AppError::NotFound
                | AppError::Conflict { .. }
                | AppError::PlanSession { .. }
        )
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "app::conflict", %message, "conflict error");
        AppError::Conflict { message }
    }

    pub fn not_found() -> Self {
        warn!(target: "app::database", "resource not found");
        AppError::NotFound
    }

    pub fn database(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(target: "app::database", %message, "database error");
        AppError::Database { message }
    }

    pub fn calendar_sync(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "app::calendar", %message, "calendar sync error");
        AppError::CalendarSync(message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(target: "app::other", %message, "other error");
        AppError::Other(message)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(error: rusqlite::Error) -> Self {
        use rusqlite::Error::{QueryReturnedNoRows, SqliteFailure};
        use rusqlite::ErrorCode;

        match &error {
            QueryReturnedNoRows => AppError::not_found(),
            SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
                AppError::conflict("违反唯一性或约束限制")
            }
            _ => {
                error!(target: "app::database", error = ?error, "sqlite error");
                AppError::database(error.to_string())
            }
        }
    }
}
