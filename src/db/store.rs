use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use tracing::debug;

use crate::db::repositories::event_repository::{EventRepository, EventRow};
use crate::db::repositories::planner_run_repository::{PlannerRunRepository, PlannerRunRow};
use crate::db::repositories::preference_repository::{PreferenceRepository, WorkPreferenceRow};
use crate::db::DbPool;
use crate::error::AppResult;
use crate::models::event::{Attendee, Event, PreferredTimeRange, Reminder};
use crate::models::planner::{PlannerRunRecord, RunStatus};
use crate::models::preference::WorkPreference;

/// Read/write contract the planner needs from calendar storage.
#[async_trait]
pub trait PlannerStore: Send + Sync {
    async fn list_events_for_user(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<Event>>;
    async fn list_events_by_ids(&self, ids: &[String]) -> AppResult<Vec<Event>>;
    /// Events with one of `ids`, a sibling copy sharing its provider id, or a
    /// pre/post/for link naming one of `ids`.
    async fn list_events_linked_to(&self, ids: &[String]) -> AppResult<Vec<Event>>;
    async fn get_work_preference(&self, user_id: &str) -> AppResult<Option<WorkPreference>>;
    async fn get_global_calendar_id(&self, user_id: &str) -> AppResult<Option<String>>;

    async fn upsert_events(&self, events: &[Event]) -> AppResult<()>;
    async fn delete_events(&self, ids: &[String]) -> AppResult<usize>;
    async fn upsert_reminders(&self, reminders: &[Reminder]) -> AppResult<()>;
    async fn list_reminders_for_event(&self, event_id: &str) -> AppResult<Vec<Reminder>>;
    async fn upsert_preferred_time_ranges(&self, ranges: &[PreferredTimeRange]) -> AppResult<()>;
    async fn list_preferred_time_ranges_for_event(
        &self,
        event_id: &str,
    ) -> AppResult<Vec<PreferredTimeRange>>;
    async fn upsert_attendees(&self, attendees: &[Attendee]) -> AppResult<()>;
    async fn list_attendees_for_event(&self, event_id: &str) -> AppResult<Vec<Attendee>>;
    /// Deletes `removed_ids` and writes every rewritten row in one transaction.
    async fn apply_event_rewrite(&self, rewrite: &EventRewrite) -> AppResult<()>;

    async fn record_planner_run(&self, run: &PlannerRunRecord) -> AppResult<()>;
    async fn get_planner_run(&self, singleton_id: &str) -> AppResult<Option<PlannerRunRecord>>;
    async fn update_planner_run_status(
        &self,
        singleton_id: &str,
        status: RunStatus,
        last_error: Option<String>,
    ) -> AppResult<()>;
}

/// Renamed events and the dependent rows that move with them.
#[derive(Debug, Clone, Default)]
pub struct EventRewrite {
    pub removed_ids: Vec<String>,
    pub events: Vec<Event>,
    pub reminders: Vec<Reminder>,
    pub preferred_time_ranges: Vec<PreferredTimeRange>,
    pub attendees: Vec<Attendee>,
}

/// `PlannerStore` over SQLite. Each call runs on the blocking pool with its own connection.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn blocking<F, T>(&self, callback: F) -> AppResult<T>
    where
        F: FnOnce(&Connection) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || pool.with_connection(callback)).await?
    }

    async fn blocking_tx<F, T>(&self, callback: F) -> AppResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || pool.with_transaction(callback)).await?
    }

    pub async fn upsert_work_preference(&self, preference: &WorkPreference) -> AppResult<()> {
        let row = WorkPreferenceRow::from_record(preference)?;
        self.blocking(move |conn| PreferenceRepository::upsert(conn, &row))
            .await
    }

    pub async fn upsert_calendar(
        &self,
        id: &str,
        user_id: &str,
        title: Option<&str>,
        is_global: bool,
    ) -> AppResult<()> {
        let (id, user_id, title) = (id.to_string(), user_id.to_string(), title.map(str::to_string));
        self.blocking(move |conn| {
            PreferenceRepository::upsert_calendar(conn, &id, &user_id, title.as_deref(), is_global)
        })
        .await
    }
}

fn rows_into_events(rows: Vec<EventRow>) -> AppResult<Vec<Event>> {
    rows.into_iter().map(EventRow::into_record).collect()
}

#[async_trait]
impl PlannerStore for SqliteStore {
    async fn list_events_for_user(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<Event>> {
        let user_id = user_id.to_string();
        let rows = self
            .blocking(move |conn| EventRepository::list_for_user_in_range(conn, &user_id, start, end))
            .await?;
        rows_into_events(rows)
    }

    async fn list_events_by_ids(&self, ids: &[String]) -> AppResult<Vec<Event>> {
        let ids = ids.to_vec();
        let rows = self
            .blocking(move |conn| EventRepository::list_by_ids(conn, &ids))
            .await?;
        rows_into_events(rows)
    }

    async fn list_events_linked_to(&self, ids: &[String]) -> AppResult<Vec<Event>> {
        let ids = ids.to_vec();
        let rows = self
            .blocking(move |conn| EventRepository::list_linked_to(conn, &ids))
            .await?;
        rows_into_events(rows)
    }

    async fn get_work_preference(&self, user_id: &str) -> AppResult<Option<WorkPreference>> {
        let user_id = user_id.to_string();
        let row = self
            .blocking(move |conn| PreferenceRepository::find_by_user(conn, &user_id))
            .await?;
        row.map(WorkPreferenceRow::into_record).transpose()
    }

    async fn get_global_calendar_id(&self, user_id: &str) -> AppResult<Option<String>> {
        let user_id = user_id.to_string();
        self.blocking(move |conn| PreferenceRepository::find_global_calendar_id(conn, &user_id))
            .await
    }

    async fn upsert_events(&self, events: &[Event]) -> AppResult<()> {
        let rows = events
            .iter()
            .map(EventRow::from_record)
            .collect::<AppResult<Vec<_>>>()?;
        let count = rows.len();
        self.blocking_tx(move |tx| {
            for row in &rows {
                EventRepository::upsert(tx, row)?;
            }
            Ok(())
        })
        .await?;
        debug!(target: "app::store", count, "events upserted");
        Ok(())
    }

    async fn delete_events(&self, ids: &[String]) -> AppResult<usize> {
        let ids = ids.to_vec();
        self.blocking(move |conn| EventRepository::delete_by_ids(conn, &ids))
            .await
    }

    async fn upsert_reminders(&self, reminders: &[Reminder]) -> AppResult<()> {
        let reminders = reminders.to_vec();
        self.blocking_tx(move |tx| {
            for reminder in &reminders {
                EventRepository::upsert_reminder(tx, reminder)?;
            }
            Ok(())
        })
        .await
    }

    async fn list_reminders_for_event(&self, event_id: &str) -> AppResult<Vec<Reminder>> {
        let event_id = event_id.to_string();
        self.blocking(move |conn| EventRepository::list_reminders_for_event(conn, &event_id))
            .await
    }

    async fn upsert_preferred_time_ranges(&self, ranges: &[PreferredTimeRange]) -> AppResult<()> {
        let ranges = ranges.to_vec();
        self.blocking_tx(move |tx| {
            for range in &ranges {
                EventRepository::upsert_preferred_time_range(tx, range)?;
            }
            Ok(())
        })
        .await
    }

    async fn upsert_attendees(&self, attendees: &[Attendee]) -> AppResult<()> {
        let attendees = attendees.to_vec();
        self.blocking_tx(move |tx| {
            for attendee in &attendees {
                EventRepository::upsert_attendee(tx, attendee)?;
            }
            Ok(())
        })
        .await
    }

    async fn list_preferred_time_ranges_for_event(
        &self,
        event_id: &str,
    ) -> AppResult<Vec<PreferredTimeRange>> {
        let event_id = event_id.to_string();
        self.blocking(move |conn| EventRepository::list_preferred_time_ranges_for_event(conn, &event_id))
            .await
    }

    async fn list_attendees_for_event(&self, event_id: &str) -> AppResult<Vec<Attendee>> {
        let event_id = event_id.to_string();
        self.blocking(move |conn| EventRepository::list_attendees_for_event(conn, &event_id))
            .await
    }

    async fn apply_event_rewrite(&self, rewrite: &EventRewrite) -> AppResult<()> {
        let rows = rewrite
            .events
            .iter()
            .map(EventRow::from_record)
            .collect::<AppResult<Vec<_>>>()?;
        let rewrite = rewrite.clone();
        let removed = self
            .blocking_tx(move |tx| {
                let removed = EventRepository::delete_by_ids(tx, &rewrite.removed_ids)?;
                for row in &rows {
                    EventRepository::upsert(tx, row)?;
                }
                for reminder in &rewrite.reminders {
                    EventRepository::upsert_reminder(tx, reminder)?;
                }
                for range in &rewrite.preferred_time_ranges {
                    EventRepository::upsert_preferred_time_range(tx, range)?;
                }
                for attendee in &rewrite.attendees {
                    EventRepository::upsert_attendee(tx, attendee)?;
                }
                Ok(removed)
            })
            .await?;
        debug!(target: "app::store", removed, "event rewrite committed");
        Ok(())
    }

    async fn record_planner_run(&self, run: &PlannerRunRecord) -> AppResult<()> {
        let row = PlannerRunRow::from_record(run);
        self.blocking(move |conn| PlannerRunRepository::insert(conn, &row))
            .await
    }

    async fn get_planner_run(&self, singleton_id: &str) -> AppResult<Option<PlannerRunRecord>> {
        let singleton_id = singleton_id.to_string();
        let row = self
            .blocking(move |conn| PlannerRunRepository::find_by_id(conn, &singleton_id))
            .await?;
        row.map(PlannerRunRow::into_record).transpose()
    }

    async fn update_planner_run_status(
        &self,
        singleton_id: &str,
        status: RunStatus,
        last_error: Option<String>,
    ) -> AppResult<()> {
        let singleton_id = singleton_id.to_string();
        self.blocking(move |conn| {
            PlannerRunRepository::update_status(conn, &singleton_id, status, last_error.as_deref())
        })
        .await
    }
}
