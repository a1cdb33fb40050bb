use std::convert::TryFrom;

use chrono::Utc;
use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::db::repositories::event_repository::utc_text;
use crate::error::AppResult;
use crate::models::preference::WorkPreference;

#[derive(Debug, Clone)]
pub struct WorkPreferenceRow {
    pub user_id: String,
    pub id: String,
    pub payload: String,
    pub updated_at: String,
}

impl WorkPreferenceRow {
    pub fn from_record(record: &WorkPreference) -> AppResult<Self> {
        Ok(Self {
            user_id: record.user_id.clone(),
            id: record.id.clone(),
            payload: serde_json::to_string(record)?,
            updated_at: utc_text(Utc::now()),
        })
    }

    pub fn into_record(self) -> AppResult<WorkPreference> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

impl TryFrom<&Row<'_>> for WorkPreferenceRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: row.get("user_id")?,
            id: row.get("id")?,
            payload: row.get("payload")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub struct PreferenceRepository;

impl PreferenceRepository {
    pub fn upsert(conn: &Connection, row: &WorkPreferenceRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO work_preferences (user_id, id, payload, updated_at)
                VALUES (:user_id, :id, :payload, :updated_at)
                ON CONFLICT(user_id) DO UPDATE SET
                    id = excluded.id,
                    payload = excluded.payload,
                    updated_at = excluded.updated_at
            "#,
            named_params! {
                ":user_id": &row.user_id,
                ":id": &row.id,
                ":payload": &row.payload,
                ":updated_at": &row.updated_at,
            },
        )?;
        Ok(())
    }

    pub fn find_by_user(conn: &Connection, user_id: &str) -> AppResult<Option<WorkPreferenceRow>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT user_id, id, payload, updated_at
            FROM work_preferences
            WHERE user_id = ?1
        "#,
        )?;
        let row = stmt
            .query_row([user_id], |row| WorkPreferenceRow::try_from(row))
            .optional()?;
        Ok(row)
    }

    pub fn upsert_calendar(
        conn: &Connection,
        id: &str,
        user_id: &str,
        title: Option<&str>,
        is_global: bool,
    ) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO calendars (id, user_id, title, is_global, created_at)
                VALUES (:id, :user_id, :title, :is_global, :created_at)
                ON CONFLICT(id) DO UPDATE SET
                    user_id = excluded.user_id,
                    title = excluded.title,
                    is_global = excluded.is_global
            "#,
            named_params! {
                ":id": id,
                ":user_id": user_id,
                ":title": title,
                ":is_global": is_global as i64,
                ":created_at": utc_text(Utc::now()),
            },
        )?;
        Ok(())
    }

    /// The user's global (primary) calendar, which receives generated breaks.
    pub fn find_global_calendar_id(conn: &Connection, user_id: &str) -> AppResult<Option<String>> {
        let id = conn
            .query_row(
                "SELECT id FROM calendars WHERE user_id = ?1 AND is_global = 1 ORDER BY created_at LIMIT 1",
                [user_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(id)
    }
}
