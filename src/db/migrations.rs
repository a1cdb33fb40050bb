use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::info;

use crate::error::{AppError, AppResult};

struct Migration {
    version: i32,
    description: &'static str,
    up: &'static str,
    down: &'static str,
}

/// Applied in order; `version` must increase by one per entry.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Add planner run tracking",
        up: r#"
            CREATE TABLE IF NOT EXISTS planner_runs (
                singleton_id TEXT PRIMARY KEY,
                host_id TEXT NOT NULL,
                file_key TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('submitted', 'reconciled', 'failed', 'stale')),
                callback_deadline TEXT NOT NULL,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_planner_runs_host ON planner_runs(host_id, created_at);
        "#,
        down: "DROP TABLE IF EXISTS planner_runs;",
    },
    Migration {
        version: 2,
        description: "Add event lookup indexes",
        up: r#"
            CREATE INDEX IF NOT EXISTS idx_events_user_window ON events(user_id, start_utc, end_utc);
            CREATE INDEX IF NOT EXISTS idx_events_provider ON events(provider_event_id);
            CREATE INDEX IF NOT EXISTS idx_reminders_event ON reminders(event_id);
            CREATE INDEX IF NOT EXISTS idx_preferred_ranges_event ON preferred_time_ranges(event_id);
            CREATE INDEX IF NOT EXISTS idx_attendees_event ON attendees(event_id);
        "#,
        down: r#"
            DROP INDEX IF EXISTS idx_events_user_window;
            DROP INDEX IF EXISTS idx_events_provider;
            DROP INDEX IF EXISTS idx_reminders_event;
            DROP INDEX IF EXISTS idx_preferred_ranges_event;
            DROP INDEX IF EXISTS idx_attendees_event;
        "#,
    },
];

pub const USER_VERSION: i32 = 2;

#[derive(Debug)]
pub struct MigrationInfo {
    pub version: i32,
    pub description: String,
    pub applied_at: DateTime<Utc>,
}

/// Brings the database up to `USER_VERSION`, one transaction per step.
pub fn run(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migration_history (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL,
            rollback_sql TEXT
        );",
    )?;

    let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current > USER_VERSION {
        return Err(AppError::database(format!(
            "数据库版本 {current} 高于程序支持的版本 {USER_VERSION}"
        )));
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        info!(
            target: "app::db",
            from = migration.version - 1,
            to = migration.version,
            description = migration.description,
            "applying migration"
        );
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.up)?;
        tx.execute(
            "INSERT OR REPLACE INTO migration_history (version, description, applied_at, rollback_sql)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                migration.version,
                migration.description,
                Utc::now().to_rfc3339(),
                migration.down
            ],
        )?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;
    }

    Ok(())
}

pub fn get_migration_history(conn: &Connection) -> AppResult<Vec<MigrationInfo>> {
    let mut stmt =
        conn.prepare("SELECT version, description, applied_at FROM migration_history ORDER BY version")?;
    let rows = stmt.query_map([], |row| {
        let raw: String = row.get(2)?;
        let applied_at = DateTime::parse_from_rfc3339(&raw)
            .map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(err))
            })?
            .with_timezone(&Utc);
        Ok(MigrationInfo {
            version: row.get(0)?,
            description: row.get(1)?,
            applied_at,
        })
    })?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
