pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;

use crate::db::store::SqliteStore;
use crate::db::DbPool;
use crate::error::AppResult;
use crate::models::settings::PlannerSettings;
use crate::services::blob_store::FsBlobStore;
use crate::services::planning_service::PlanningService;
use crate::services::solver_client::HttpSolverClient;

/// Wires the SQLite store, filesystem blob store and HTTP solver from `settings`.
pub fn build_planning_service(settings: PlannerSettings) -> AppResult<PlanningService> {
    let pool = DbPool::new(&settings.database_path)?;
    let store = Arc::new(SqliteStore::new(pool));
    let blobs = Arc::new(FsBlobStore::new(settings.blob_root.clone()));
    let solver = Arc::new(HttpSolverClient::try_new(&settings)?);
    Ok(PlanningService::new(store, blobs, solver, settings))
}
