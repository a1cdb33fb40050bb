use chrono::{Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use meeting_planner_lib::db::migrations::{get_migration_history, USER_VERSION};
use meeting_planner_lib::db::store::{PlannerStore, SqliteStore};
use meeting_planner_lib::db::DbPool;
use meeting_planner_lib::error::AppError;
use meeting_planner_lib::models::event::{Attendee, Event, Reminder};
use meeting_planner_lib::models::planner::{PlannerRunRecord, RunStatus};
use meeting_planner_lib::models::preference::WorkPreference;
use tempfile::{tempdir, TempDir};

fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 5, day)
        .expect("date")
        .and_hms_opt(hour, minute, 0)
        .expect("time")
}

fn open_store() -> (TempDir, SqliteStore) {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("planner.sqlite")).expect("db pool");
    (dir, SqliteStore::new(pool))
}

#[test]
fn migrations_are_recorded_once() {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("schema.sqlite")).expect("db pool");

    // Opening twice must not replay migrations.
    let _ = pool.get_connection().expect("first connection");
    let conn = pool.get_connection().expect("second connection");

    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .expect("user_version");
    assert_eq!(version, USER_VERSION);

    let history = get_migration_history(&conn).expect("history");
    let versions: Vec<i32> = history.iter().map(|info| info.version).collect();
    assert_eq!(versions, vec![1, 2]);

    for table in [
        "calendars",
        "work_preferences",
        "events",
        "reminders",
        "preferred_time_ranges",
        "attendees",
        "planner_runs",
    ] {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .expect("sqlite_master");
        assert_eq!(count, 1, "missing table {table}");
    }
}

#[tokio::test]
async fn events_are_listed_by_utc_overlap() {
    let (_dir, store) = open_store();

    let morning = Event::new("standup#work", "ana", at(5, 9, 0), at(5, 9, 30), "America/New_York");
    let evening = Event::new("dinner#work", "ana", at(5, 19, 0), at(5, 20, 0), "America/New_York");
    let other_user = Event::new("sync#work", "bo", at(5, 9, 0), at(5, 10, 0), "America/New_York");
    store
        .upsert_events(&[morning.clone(), evening.clone(), other_user])
        .await
        .expect("upsert");

    // 09:00 New York is 13:00 UTC in May.
    let start = Utc.with_ymd_and_hms(2025, 5, 5, 12, 0, 0).unwrap();
    let listed = store
        .list_events_for_user("ana", start, start + Duration::hours(4))
        .await
        .expect("list");
    assert_eq!(listed, vec![morning.clone()]);

    let whole_day = store
        .list_events_for_user("ana", start - Duration::hours(12), start + Duration::hours(12))
        .await
        .expect("list day");
    let ids: Vec<&str> = whole_day.iter().map(|event| event.id.as_str()).collect();
    assert_eq!(ids, vec!["standup#work", "dinner#work"]);

    let mut moved = morning.clone();
    moved.start_date = at(5, 11, 0);
    moved.end_date = at(5, 11, 30);
    store.upsert_events(&[moved.clone()]).await.expect("re-upsert");
    let by_id = store
        .list_events_by_ids(&["standup#work".to_string()])
        .await
        .expect("by id");
    assert_eq!(by_id, vec![moved]);

    let removed = store
        .delete_events(&["standup#work".to_string(), "missing#work".to_string()])
        .await
        .expect("delete");
    assert_eq!(removed, 1);
    let after = store
        .list_events_by_ids(&["standup#work".to_string()])
        .await
        .expect("by id after delete");
    assert!(after.is_empty());
}

#[tokio::test]
async fn preferences_and_global_calendar_round_trip() {
    let (_dir, store) = open_store();

    assert!(store.get_work_preference("ana").await.expect("get").is_none());

    let mut preference = WorkPreference::uniform("ana", (9, 0), (17, 0));
    preference.min_number_of_breaks = 2;
    preference.reminders = vec![10, 30];
    store
        .upsert_work_preference(&preference)
        .await
        .expect("upsert preference");
    assert_eq!(
        store.get_work_preference("ana").await.expect("get"),
        Some(preference)
    );

    store
        .upsert_calendar("work", "ana", Some("Work"), false)
        .await
        .expect("calendar");
    assert_eq!(store.get_global_calendar_id("ana").await.expect("global"), None);

    store
        .upsert_calendar("primary", "ana", Some("Primary"), true)
        .await
        .expect("global calendar");
    assert_eq!(
        store.get_global_calendar_id("ana").await.expect("global"),
        Some("primary".to_string())
    );
}

#[tokio::test]
async fn dependents_are_listed_per_event() {
    let (_dir, store) = open_store();

    let reminder = Reminder {
        id: "r1".to_string(),
        user_id: "ana".to_string(),
        event_id: "meet#work".to_string(),
        timezone: Some("America/New_York".to_string()),
        minutes: 15,
        use_default: false,
    };
    store
        .upsert_reminders(&[reminder.clone()])
        .await
        .expect("reminders");
    assert_eq!(
        store.list_reminders_for_event("meet#work").await.expect("list"),
        vec![reminder]
    );

    let attendee = Attendee {
        id: "a1".to_string(),
        event_id: "meet#work".to_string(),
        user_id: Some("bo".to_string()),
        name: Some("Bo".to_string()),
        email: Some("bo@example.com".to_string()),
        is_external: true,
    };
    store
        .upsert_attendees(&[attendee.clone()])
        .await
        .expect("attendees");
    assert_eq!(
        store.list_attendees_for_event("meet#work").await.expect("list"),
        vec![attendee]
    );
    assert!(store
        .list_attendees_for_event("other#work")
        .await
        .expect("list other")
        .is_empty());
}

#[tokio::test]
async fn planner_run_status_transitions() {
    let (_dir, store) = open_store();
    let now = Utc::now();

    store
        .record_planner_run(&PlannerRunRecord {
            singleton_id: "run-1".to_string(),
            host_id: "ana".to_string(),
            file_key: "ana/run-1.json".to_string(),
            status: RunStatus::Submitted,
            callback_deadline: now + Duration::minutes(30),
            last_error: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .expect("record");

    store
        .update_planner_run_status("run-1", RunStatus::Failed, Some("solver down".to_string()))
        .await
        .expect("update");
    let run = store
        .get_planner_run("run-1")
        .await
        .expect("get")
        .expect("run exists");
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.last_error.as_deref(), Some("solver down"));
    assert_eq!(run.file_key, "ana/run-1.json");

    assert!(store.get_planner_run("missing").await.expect("get").is_none());
    let missing = store
        .update_planner_run_status("missing", RunStatus::Stale, None)
        .await
        .expect_err("unknown run");
    assert!(matches!(missing, AppError::NotFound));
}
