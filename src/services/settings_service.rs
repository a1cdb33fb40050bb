use std::path::PathBuf;
use std::time::Duration as StdDuration;

use serde_json::json;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::settings::PlannerSettings;
use crate::models::timeslot::Granularity;

const ENV_PREFIX: &str = "MEETING_PLANNER_";
const MAX_CONCURRENCY_LIMIT: usize = 64;

/// Overlays `MEETING_PLANNER_*` values from `lookup` on the defaults.
pub fn load_settings_with<F>(lookup: F) -> AppResult<PlannerSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| -> Option<String> {
        lookup(&format!("{ENV_PREFIX}{name}"))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let mut settings = PlannerSettings::default();

    if let Some(url) = read("SOLVER_URL") {
        ensure_http_url("SOLVER_URL", &url)?;
        settings.solver_base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(username) = read("SOLVER_USERNAME") {
        settings.solver_username = username;
    }
    if let Some(password) = read("SOLVER_PASSWORD") {
        settings.solver_password = password;
    }
    if let Some(url) = read("CALLBACK_URL") {
        ensure_http_url("CALLBACK_URL", &url)?;
        settings.callback_url = url;
    }
    if let Some(raw) = read("SOLVER_DELAY") {
        settings.solver_delay = parse_number("SOLVER_DELAY", &raw)?;
    }
    if let Some(raw) = read("GRANULARITY") {
        settings.granularity = raw.parse::<Granularity>().map_err(|err| {
            AppError::validation_with_details("无效的时间粒度配置", json!({ "value": raw, "error": err }))
        })?;
    }
    if let Some(raw) = read("MAX_CONCURRENCY") {
        let value: u64 = parse_number("MAX_CONCURRENCY", &raw)?;
        let value = value as usize;
        if value == 0 || value > MAX_CONCURRENCY_LIMIT {
            return Err(AppError::validation_with_details(
                "并发数超出允许范围",
                json!({ "value": value, "max": MAX_CONCURRENCY_LIMIT }),
            ));
        }
        settings.max_concurrency = value;
    }
    if let Some(raw) = read("HTTP_TIMEOUT_SECS") {
        settings.http_timeout = parse_seconds("HTTP_TIMEOUT_SECS", &raw)?;
    }
    if let Some(raw) = read("SUBMIT_DEADLINE_SECS") {
        settings.submit_deadline = parse_seconds("SUBMIT_DEADLINE_SECS", &raw)?;
    }
    if let Some(raw) = read("CALLBACK_DEADLINE_SECS") {
        settings.callback_deadline = parse_seconds("CALLBACK_DEADLINE_SECS", &raw)?;
    }
    if let Some(path) = read("DB_PATH") {
        settings.database_path = PathBuf::from(path);
    }
    if let Some(path) = read("BLOB_ROOT") {
        settings.blob_root = PathBuf::from(path);
    }

    debug!(
        target: "app::settings",
        solver = %settings.solver_base_url,
        granularity = ?settings.granularity,
        concurrency = settings.max_concurrency,
        "planner settings loaded"
    );

    Ok(settings)
}

fn ensure_http_url(name: &str, value: &str) -> AppResult<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(AppError::validation_with_details(
            "地址必须以 http:// 或 https:// 开头",
            json!({ "key": format!("{ENV_PREFIX}{name}"), "value": value }),
        ))
    }
}

fn parse_number(name: &str, raw: &str) -> AppResult<u64> {
    raw.parse::<u64>().map_err(|err| {
        AppError::validation_with_details(
            "配置项必须为非负整数",
            json!({ "key": format!("{ENV_PREFIX}{name}"), "value": raw, "error": err.to_string() }),
        )
    })
}

fn parse_seconds(name: &str, raw: &str) -> AppResult<StdDuration> {
    let secs = parse_number(name, raw)?;
    if secs == 0 {
        return Err(AppError::validation_with_details(
            "超时时间必须大于 0",
            json!({ "key": format!("{ENV_PREFIX}{name}") }),
        ));
    }
    Ok(StdDuration::from_secs(secs))
}
