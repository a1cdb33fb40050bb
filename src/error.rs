use std::fmt;

use rusqlite;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, warn};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverErrorCode {
    Unauthorized,
    RateLimited,
    HttpTimeout,
    Unavailable,
    InvalidRequest,
    DeadlineExceeded,
    Unknown,
}

impl SolverErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            SolverErrorCode::Unauthorized => "UNAUTHORIZED",
            SolverErrorCode::RateLimited => "RATE_LIMITED",
            SolverErrorCode::HttpTimeout => "HTTP_TIMEOUT",
            SolverErrorCode::Unavailable => "SOLVER_UNAVAILABLE",
            SolverErrorCode::InvalidRequest => "INVALID_REQUEST",
            SolverErrorCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            SolverErrorCode::Unknown => "UNKNOWN_SOLVER_ERROR",
        }
    }
}

impl fmt::Display for SolverErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("数据库错误: {message}")]
    Database { message: String },

    #[error("存储不可用: {message}")]
    StoreUnavailable { message: String },

    #[error("记录未找到")]
    NotFound,

    #[error("记录冲突: {message}")]
    Conflict { message: String },

    #[error("验证失败: {message}")]
    Validation {
        message: String,
        details: Option<JsonValue>,
    },

    #[error("{message}")]
    Solver {
        code: SolverErrorCode,
        message: String,
        retryable: bool,
        correlation_id: Option<String>,
        status: Option<u16>,
    },

    #[error("求解结果时长不一致: 事件 {event_id} 期望 {expected_minutes} 分钟, 实际 {actual_minutes} 分钟")]
    DurationMismatch {
        event_id: String,
        expected_minutes: i64,
        actual_minutes: i64,
    },

    #[error("排程已过期: {singleton_id}")]
    StalePlan { singleton_id: String },

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
            details: None,
        }
    }

    pub fn validation_with_details(message: impl Into<String>, details: JsonValue) -> Self {
        let message = message.into();
        warn!(target: "app::validation", %message, details = %details, "validation error with details");
        AppError::Validation {
            message,
            details: Some(details),
        }
    }

    pub fn solver(
        code: SolverErrorCode,
        message: impl Into<String>,
        retryable: bool,
        correlation_id: Option<&str>,
        status: Option<u16>,
    ) -> Self {
        let message = message.into();
        let correlation = correlation_id.map(|value| value.to_string());
        match &correlation {
            Some(id) => {
                warn!(
                    target: "app::solver::error",
                    code = %code,
                    correlation_id = %id,
                    status = ?status,
                    retryable,
                    %message
                );
            }
            None => {
                warn!(target: "app::solver::error", code = %code, status = ?status, retryable, %message);
            }
        }

        AppError::Solver {
            code,
            message,
            retryable,
            correlation_id: correlation,
            status,
        }
    }

    pub fn solver_code(&self) -> Option<SolverErrorCode> {
        match self {
            AppError::Solver { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn solver_correlation_id(&self) -> Option<&str> {
        match self {
            AppError::Solver { correlation_id, .. } => correlation_id.as_deref(),
            _ => None,
        }
    }

    pub fn duration_mismatch(
        event_id: impl Into<String>,
        expected_minutes: i64,
        actual_minutes: i64,
    ) -> Self {
        let event_id = event_id.into();
        error!(
            target: "app::reconcile",
            %event_id,
            expected_minutes,
            actual_minutes,
            "solver assignment span does not match part count"
        );
        AppError::DurationMismatch {
            event_id,
            expected_minutes,
            actual_minutes,
        }
    }

    pub fn stale_plan(singleton_id: impl Into<String>) -> Self {
        let singleton_id = singleton_id.into();
        warn!(target: "app::planner", %singleton_id, "callback arrived after deadline");
        AppError::StalePlan { singleton_id }
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "app::store", %message, "store unavailable");
        AppError::StoreUnavailable { message }
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

    pub fn other(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(target: "app::other", %message, "other error");
        AppError::Other(message)
    }

    /// Whether a caller may repeat the failed operation unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::StoreUnavailable { .. } => true,
            AppError::Solver { retryable, .. } => *retryable,
            _ => false,
        }
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
            SqliteFailure(err, _)
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen
                ) =>
            {
                AppError::store_unavailable(error.to_string())
            }
            _ => {
                error!(target: "app::database", error = ?error, "sqlite error");
                AppError::database(error.to_string())
            }
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(error: tokio::task::JoinError) -> Self {
        AppError::other(format!("后台任务执行失败: {error}"))
    }
}
