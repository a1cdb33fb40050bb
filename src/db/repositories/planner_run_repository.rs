use std::convert::TryFrom;

use chrono::{DateTime, Utc};
use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::db::repositories::event_repository::utc_text;
use crate::error::{AppError, AppResult};
use crate::models::planner::{PlannerRunRecord, RunStatus};

#[derive(Debug, Clone)]
pub struct PlannerRunRow {
    pub singleton_id: String,
    pub host_id: String,
    pub file_key: String,
    pub status: String,
    pub callback_deadline: String,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

fn parse_timestamp(raw: &str, field: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| AppError::database(format!("无效的时间字段 {field}: {err}")))
}

impl PlannerRunRow {
    pub fn from_record(record: &PlannerRunRecord) -> Self {
        Self {
            singleton_id: record.singleton_id.clone(),
            host_id: record.host_id.clone(),
            file_key: record.file_key.clone(),
            status: record.status.as_str().to_string(),
            callback_deadline: utc_text(record.callback_deadline),
            last_error: record.last_error.clone(),
            created_at: utc_text(record.created_at),
            updated_at: utc_text(record.updated_at),
        }
    }

    pub fn into_record(self) -> AppResult<PlannerRunRecord> {
        let status = self
            .status
            .parse::<RunStatus>()
            .map_err(AppError::database)?;
        Ok(PlannerRunRecord {
            callback_deadline: parse_timestamp(&self.callback_deadline, "callback_deadline")?,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
            singleton_id: self.singleton_id,
            host_id: self.host_id,
            file_key: self.file_key,
            status,
            last_error: self.last_error,
        })
    }
}

impl TryFrom<&Row<'_>> for PlannerRunRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            singleton_id: row.get("singleton_id")?,
            host_id: row.get("host_id")?,
            file_key: row.get("file_key")?,
            status: row.get("status")?,
            callback_deadline: row.get("callback_deadline")?,
            last_error: row.get("last_error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub struct PlannerRunRepository;

impl PlannerRunRepository {
    pub fn insert(conn: &Connection, row: &PlannerRunRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO planner_runs (
                    singleton_id,
                    host_id,
                    file_key,
                    status,
                    callback_deadline,
                    last_error,
                    created_at,
                    updated_at
                ) VALUES (
                    :singleton_id,
                    :host_id,
                    :file_key,
                    :status,
                    :callback_deadline,
                    :last_error,
                    :created_at,
                    :updated_at
                )
            "#,
            named_params! {
                ":singleton_id": &row.singleton_id,
                ":host_id": &row.host_id,
                ":file_key": &row.file_key,
                ":status": &row.status,
                ":callback_deadline": &row.callback_deadline,
                ":last_error": &row.last_error,
                ":created_at": &row.created_at,
                ":updated_at": &row.updated_at,
            },
        )?;
        Ok(())
    }

    pub fn update_status(
        conn: &Connection,
        singleton_id: &str,
        status: RunStatus,
        last_error: Option<&str>,
    ) -> AppResult<()> {
        let affected = conn.execute(
            r#"
                UPDATE planner_runs SET
                    status = :status,
                    last_error = :last_error,
                    updated_at = :updated_at
                WHERE singleton_id = :singleton_id
            "#,
            named_params! {
                ":singleton_id": singleton_id,
                ":status": status.as_str(),
                ":last_error": last_error,
                ":updated_at": utc_text(Utc::now()),
            },
        )?;

        if affected == 0 {
            return Err(AppError::not_found());
        }
        Ok(())
    }

    pub fn find_by_id(conn: &Connection, singleton_id: &str) -> AppResult<Option<PlannerRunRow>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT
                singleton_id,
                host_id,
                file_key,
                status,
                callback_deadline,
                last_error,
                created_at,
                updated_at
            FROM planner_runs
            WHERE singleton_id = ?1
        "#,
        )?;
        let row = stmt
            .query_row([singleton_id], |row| PlannerRunRow::try_from(row))
            .optional()?;
        Ok(row)
    }
}
