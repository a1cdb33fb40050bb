use std::convert::TryFrom;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{named_params, params_from_iter, Connection, Row};

use crate::error::AppResult;
use crate::models::event::{Attendee, Event, PreferredTimeRange, Reminder};
use crate::models::timeslot::parse_clock_time;
use crate::services::schedule_utils::{anchor, event_timezone};

pub fn utc_text(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Clone)]
pub struct EventRow {
    pub id: String,
    pub user_id: String,
    pub calendar_id: Option<String>,
    pub provider_event_id: Option<String>,
    pub start_utc: String,
    pub end_utc: String,
    pub payload: String,
    pub updated_at: String,
}

impl EventRow {
    pub fn from_record(event: &Event) -> AppResult<Self> {
        let tz = event_timezone(event)?;
        Ok(Self {
            id: event.id.clone(),
            user_id: event.user_id.clone(),
            calendar_id: event.calendar_id.clone(),
            provider_event_id: Some(event.provider_id().to_string()),
            start_utc: utc_text(anchor(event.start_date, tz)?.with_timezone(&Utc)),
            end_utc: utc_text(anchor(event.end_date, tz)?.with_timezone(&Utc)),
            payload: serde_json::to_string(event)?,
            updated_at: utc_text(Utc::now()),
        })
    }

    pub fn into_record(self) -> AppResult<Event> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

impl TryFrom<&Row<'_>> for EventRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            calendar_id: row.get("calendar_id")?,
            provider_event_id: row.get("provider_event_id")?,
            start_utc: row.get("start_utc")?,
            end_utc: row.get("end_utc")?,
            payload: row.get("payload")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

pub struct EventRepository;

impl EventRepository {
    pub fn upsert(conn: &Connection, row: &EventRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO events (
                    id,
                    user_id,
                    calendar_id,
                    provider_event_id,
                    start_utc,
                    end_utc,
                    payload,
                    updated_at
                ) VALUES (
                    :id,
                    :user_id,
                    :calendar_id,
                    :provider_event_id,
                    :start_utc,
                    :end_utc,
                    :payload,
                    :updated_at
                )
                ON CONFLICT(id) DO UPDATE SET
                    user_id = excluded.user_id,
                    calendar_id = excluded.calendar_id,
                    provider_event_id = excluded.provider_event_id,
                    start_utc = excluded.start_utc,
                    end_utc = excluded.end_utc,
                    payload = excluded.payload,
                    updated_at = excluded.updated_at
            "#,
            named_params! {
                ":id": &row.id,
                ":user_id": &row.user_id,
                ":calendar_id": &row.calendar_id,
                ":provider_event_id": &row.provider_event_id,
                ":start_utc": &row.start_utc,
                ":end_utc": &row.end_utc,
                ":payload": &row.payload,
                ":updated_at": &row.updated_at,
            },
        )?;
        Ok(())
    }

    /// Events of `user_id` overlapping `[start, end)`, ordered by start.
    pub fn list_for_user_in_range(
        conn: &Connection,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<EventRow>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT
                id,
                user_id,
                calendar_id,
                provider_event_id,
                start_utc,
                end_utc,
                payload,
                updated_at
            FROM events
            WHERE user_id = :user_id
              AND start_utc < :end
              AND end_utc > :start
            ORDER BY start_utc, id
        "#,
        )?;

        let rows = stmt
            .query_map(
                named_params! {
                    ":user_id": user_id,
                    ":start": utc_text(start),
                    ":end": utc_text(end),
                },
                |row| EventRow::try_from(row),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_by_ids(conn: &Connection, ids: &[String]) -> AppResult<Vec<EventRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT
                id,
                user_id,
                calendar_id,
                provider_event_id,
                start_utc,
                end_utc,
                payload,
                updated_at
            FROM events
            WHERE id IN ({})
            ORDER BY start_utc, id
        "#,
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter()), |row| EventRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Events that are one of `ids`, share a provider id with one of them, or
    /// point at one of them through a buffer link.
    pub fn list_linked_to(conn: &Connection, ids: &[String]) -> AppResult<Vec<EventRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut provider_ids: Vec<String> = ids
            .iter()
            .map(|id| id.split('#').next().unwrap_or(id.as_str()).to_string())
            .collect();
        provider_ids.sort();
        provider_ids.dedup();

        let id_list = placeholders(ids.len());
        let sql = format!(
            r#"
            SELECT
                id,
                user_id,
                calendar_id,
                provider_event_id,
                start_utc,
                end_utc,
                payload,
                updated_at
            FROM events
            WHERE id IN ({id_list})
               OR provider_event_id IN ({provider_list})
               OR json_extract(payload, '$.preEventId') IN ({id_list})
               OR json_extract(payload, '$.postEventId') IN ({id_list})
               OR json_extract(payload, '$.forEventId') IN ({id_list})
            ORDER BY start_utc, id
        "#,
            provider_list = placeholders(provider_ids.len()),
        );
        let params = ids
            .iter()
            .chain(provider_ids.iter())
            .chain(ids.iter())
            .chain(ids.iter())
            .chain(ids.iter());
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params), |row| EventRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_by_ids(conn: &Connection, ids: &[String]) -> AppResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!("DELETE FROM events WHERE id IN ({})", placeholders(ids.len()));
        Ok(conn.execute(&sql, params_from_iter(ids.iter()))?)
    }

    pub fn upsert_reminder(conn: &Connection, reminder: &Reminder) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO reminders (id, event_id, user_id, timezone, minutes, use_default)
                VALUES (:id, :event_id, :user_id, :timezone, :minutes, :use_default)
                ON CONFLICT(id) DO UPDATE SET
                    event_id = excluded.event_id,
                    user_id = excluded.user_id,
                    timezone = excluded.timezone,
                    minutes = excluded.minutes,
                    use_default = excluded.use_default
            "#,
            named_params! {
                ":id": &reminder.id,
                ":event_id": &reminder.event_id,
                ":user_id": &reminder.user_id,
                ":timezone": &reminder.timezone,
                ":minutes": reminder.minutes,
                ":use_default": reminder.use_default as i64,
            },
        )?;
        Ok(())
    }

    pub fn list_reminders_for_event(conn: &Connection, event_id: &str) -> AppResult<Vec<Reminder>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, event_id, user_id, timezone, minutes, use_default
            FROM reminders
            WHERE event_id = ?1
            ORDER BY minutes, id
        "#,
        )?;
        let rows = stmt
            .query_map([event_id], |row| {
                Ok(Reminder {
                    id: row.get("id")?,
                    event_id: row.get("event_id")?,
                    user_id: row.get("user_id")?,
                    timezone: row.get("timezone")?,
                    minutes: row.get("minutes")?,
                    use_default: row.get::<_, i64>("use_default")? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn upsert_preferred_time_range(conn: &Connection, range: &PreferredTimeRange) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO preferred_time_ranges (id, event_id, user_id, day_of_week, start_time, end_time)
                VALUES (:id, :event_id, :user_id, :day_of_week, :start_time, :end_time)
                ON CONFLICT(id) DO UPDATE SET
                    event_id = excluded.event_id,
                    user_id = excluded.user_id,
                    day_of_week = excluded.day_of_week,
                    start_time = excluded.start_time,
                    end_time = excluded.end_time
            "#,
            named_params! {
                ":id": &range.id,
                ":event_id": &range.event_id,
                ":user_id": &range.user_id,
                ":day_of_week": range.day_of_week,
                ":start_time": range.start_time.format("%H:%M").to_string(),
                ":end_time": range.end_time.format("%H:%M").to_string(),
            },
        )?;
        Ok(())
    }

    pub fn list_preferred_time_ranges_for_event(
        conn: &Connection,
        event_id: &str,
    ) -> AppResult<Vec<PreferredTimeRange>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, event_id, user_id, day_of_week, start_time, end_time
            FROM preferred_time_ranges
            WHERE event_id = ?1
            ORDER BY id
        "#,
        )?;
        let rows = stmt
            .query_map([event_id], |row| {
                let start: String = row.get("start_time")?;
                let end: String = row.get("end_time")?;
                let invalid = |index: usize, name: &str| {
                    rusqlite::Error::InvalidColumnType(index, name.to_string(), rusqlite::types::Type::Text)
                };
                Ok(PreferredTimeRange {
                    id: row.get("id")?,
                    event_id: row.get("event_id")?,
                    user_id: row.get("user_id")?,
                    day_of_week: row.get("day_of_week")?,
                    start_time: parse_clock_time(&start).ok_or_else(|| invalid(4, "start_time"))?,
                    end_time: parse_clock_time(&end).ok_or_else(|| invalid(5, "end_time"))?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn upsert_attendee(conn: &Connection, attendee: &Attendee) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO attendees (id, event_id, user_id, name, email, is_external)
                VALUES (:id, :event_id, :user_id, :name, :email, :is_external)
                ON CONFLICT(id) DO UPDATE SET
                    event_id = excluded.event_id,
                    user_id = excluded.user_id,
                    name = excluded.name,
                    email = excluded.email,
                    is_external = excluded.is_external
            "#,
            named_params! {
                ":id": &attendee.id,
                ":event_id": &attendee.event_id,
                ":user_id": &attendee.user_id,
                ":name": &attendee.name,
                ":email": &attendee.email,
                ":is_external": attendee.is_external as i64,
            },
        )?;
        Ok(())
    }

    pub fn list_attendees_for_event(conn: &Connection, event_id: &str) -> AppResult<Vec<Attendee>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, event_id, user_id, name, email, is_external
            FROM attendees
            WHERE event_id = ?1
            ORDER BY id
        "#,
        )?;
        let rows = stmt
            .query_map([event_id], |row| {
                Ok(Attendee {
                    id: row.get("id")?,
                    event_id: row.get("event_id")?,
                    user_id: row.get("user_id")?,
                    name: row.get("name")?,
                    email: row.get("email")?,
                    is_external: row.get::<_, i64>("is_external")? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
