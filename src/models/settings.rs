use std::path::PathBuf;
use std::time::Duration as StdDuration;

use serde::Serialize;

use crate::error::AppResult;
use crate::models::timeslot::Granularity;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlannerSettings {
    pub solver_base_url: String,
    pub solver_username: String,
    #[serde(skip_serializing)]
    pub solver_password: String,
    pub callback_url: String,
    /// Seconds the solver may spend before answering.
    pub solver_delay: u64,
    pub granularity: Granularity,
    pub max_concurrency: usize,
    pub http_timeout: StdDuration,
    pub submit_deadline: StdDuration,
    pub callback_deadline: StdDuration,
    pub database_path: PathBuf,
    pub blob_root: PathBuf,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            solver_base_url: "http://localhost:8081".to_string(),
            solver_username: "admin".to_string(),
            solver_password: String::new(),
            callback_url: "http://localhost:3000/planner/callback".to_string(),
            solver_delay: 10,
            granularity: Granularity::Full,
            max_concurrency: 4,
            http_timeout: StdDuration::from_secs(30),
            submit_deadline: StdDuration::from_secs(60),
            callback_deadline: StdDuration::from_secs(30 * 60),
            database_path: PathBuf::from("meeting-planner.sqlite"),
            blob_root: PathBuf::from("planner-blobs"),
        }
    }
}

impl PlannerSettings {
    /// Defaults overlaid with `MEETING_PLANNER_*` environment variables.
    pub fn from_env() -> AppResult<Self> {
        crate::services::settings_service::load_settings_with(|key| std::env::var(key).ok())
    }
}
