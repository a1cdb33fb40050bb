use std::path::PathBuf;

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, fmt::time::UtcTime, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::error::{AppError, AppResult};

static LOGGER_INIT: OnceCell<()> = OnceCell::new();
static LOGGER_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

const DEFAULT_LOG_DIRECTIVES: &str = "info,app::planner=debug,app::breaks=info,app::solver=debug,app::reconcile=debug,app::store=info,app::db=info";

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub log_dir: PathBuf,
    /// Prefix of the daily rolled file.
    pub file_name: String,
    /// Used when `RUST_LOG` is unset.
    pub directives: String,
    pub stdout: bool,
}

impl LogOptions {
    pub fn in_dir(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            file_name: "meeting-planner.log".to_string(),
            directives: DEFAULT_LOG_DIRECTIVES.to_string(),
            stdout: true,
        }
    }
}

fn build_filter(directives: &str) -> AppResult<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives))
        .map_err(|err| AppError::other(format!("解析日志级别失败: {err}")))
}

/// Installs the global subscriber once. Later calls are no-ops.
pub fn init_logging(options: &LogOptions) -> AppResult<()> {
    LOGGER_INIT
        .get_or_try_init(|| {
            std::fs::create_dir_all(&options.log_dir)?;
            let filter = build_filter(&options.directives)?;

            let appender = tracing_appender::rolling::daily(&options.log_dir, &options.file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            LOGGER_GUARD
                .set(guard)
                .map_err(|_| AppError::other("日志已初始化"))?;

            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_timer(UtcTime::rfc_3339());
            let stdout_layer = options.stdout.then(|| {
                fmt::layer()
                    .with_target(false)
                    .with_timer(UtcTime::rfc_3339())
            });

            tracing_subscriber::registry()
                .with(filter)
                .with(file_layer)
                .with(stdout_layer)
                .try_init()
                .map_err(|err| AppError::other(format!("安装日志订阅器失败: {err}")))?;
            Ok(())
        })
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn repeated_initialisation_is_a_no_op() -> AppResult<()> {
        let dir = tempdir()?;
        let mut options = LogOptions::in_dir(dir.path());
        options.stdout = false;
        init_logging(&options)?;
        init_logging(&options)?;
        tracing::info!(target: "app::planner", "logger ready");
        assert!(dir.path().exists());
        Ok(())
    }

    #[test]
    fn default_directives_parse() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(build_filter(DEFAULT_LOG_DIRECTIVES).is_ok());
        assert!(build_filter("app::planner=loud").is_err());
    }
}
