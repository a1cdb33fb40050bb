#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use meeting_planner_lib::db::store::{PlannerStore, SqliteStore};
use meeting_planner_lib::db::DbPool;
use meeting_planner_lib::error::{AppError, AppResult, SolverErrorCode};
use meeting_planner_lib::models::event::{BufferTimes, Event};
use meeting_planner_lib::models::planner::{AssignedTimeslot, PlannerRequest, PlannerResponsePart};
use meeting_planner_lib::models::preference::WorkPreference;
use meeting_planner_lib::models::settings::PlannerSettings;
use meeting_planner_lib::models::timeslot::{DayOfWeek, MonthDay};
use meeting_planner_lib::services::blob_store::FsBlobStore;
use meeting_planner_lib::services::planning_service::{AttendeeRef, PlanningInput, PlanningService};
use meeting_planner_lib::services::solver_client::{PlannerSolver, SubmissionReceipt};
use tempfile::TempDir;

pub const HOST_TZ: &str = "America/New_York";
pub const GUEST_TZ: &str = "Europe/London";

/// Solver double that keeps every request it was handed.
#[derive(Default)]
pub struct RecordingSolver {
    pub requests: Mutex<Vec<PlannerRequest>>,
    pub reject: bool,
}

impl RecordingSolver {
    pub fn rejecting() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    pub fn last_request(&self) -> PlannerRequest {
        self.requests
            .lock()
            .expect("requests lock")
            .last()
            .cloned()
            .expect("a request was submitted")
    }
}

#[async_trait]
impl PlannerSolver for RecordingSolver {
    async fn submit(&self, request: &PlannerRequest) -> AppResult<SubmissionReceipt> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        if self.reject {
            return Err(AppError::solver(
                SolverErrorCode::InvalidRequest,
                "求解器拒绝了排程请求",
                false,
                Some("corr-test"),
                Some(400),
            ));
        }
        Ok(SubmissionReceipt {
            singleton_id: request.singleton_id.clone(),
            correlation_id: "corr-test".to_string(),
            status: 202,
            attempts: 1,
        })
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<SqliteStore>,
    pub solver: Arc<RecordingSolver>,
    pub service: PlanningService,
}

pub fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 5, day)
        .expect("date")
        .and_hms_opt(hour, minute, 0)
        .expect("time")
}

pub fn settings_in(dir: &TempDir, callback_deadline: StdDuration) -> PlannerSettings {
    PlannerSettings {
        database_path: dir.path().join("planner.sqlite"),
        blob_root: dir.path().join("blobs"),
        callback_deadline,
        ..PlannerSettings::default()
    }
}

pub fn harness_with(solver: RecordingSolver, callback_deadline: StdDuration) -> Harness {
    let dir = tempfile::tempdir().expect("temp dir");
    let settings = settings_in(&dir, callback_deadline);
    let pool = DbPool::new(settings.database_path.clone()).expect("db pool");
    let store = Arc::new(SqliteStore::new(pool));
    let blobs = Arc::new(FsBlobStore::new(settings.blob_root.clone()));
    let solver = Arc::new(solver);
    let service = PlanningService::new(store.clone(), blobs, solver.clone(), settings)
        .with_store_backoff(vec![StdDuration::ZERO]);
    Harness {
        dir,
        store,
        solver,
        service,
    }
}

pub fn harness() -> Harness {
    harness_with(RecordingSolver::default(), StdDuration::from_secs(30 * 60))
}

/// Host works 09:00-17:00 with two 30 minute breaks a day and has a morning
/// focus block. The guest has no stored preference and is busy 14:00-18:00 London.
pub async fn seed(store: &SqliteStore) {
    let mut preference = WorkPreference::uniform("host", (9, 0), (17, 0));
    preference.min_number_of_breaks = 2;
    preference.reminders = vec![10];
    store
        .upsert_work_preference(&preference)
        .await
        .expect("host preference");
    store
        .upsert_calendar("primary", "host", Some("Primary"), true)
        .await
        .expect("global calendar");

    let mut focus = Event::new("focus#cal", "host", at(5, 9, 0), at(5, 12, 0), HOST_TZ);
    focus.calendar_id = Some("cal".to_string());
    let mut guest = Event::new("guest-ev#gcal", "guest", at(5, 14, 0), at(5, 18, 0), GUEST_TZ);
    guest.calendar_id = Some("gcal".to_string());
    store
        .upsert_events(&[focus, guest])
        .await
        .expect("seed events");
}

pub fn meeting() -> Event {
    let mut meeting = Event::new("meet#cal", "host", at(5, 13, 0), at(5, 14, 0), HOST_TZ);
    meeting.calendar_id = Some("cal".to_string());
    meeting.title = Some("Design review".to_string());
    meeting.is_meeting = true;
    meeting.time_blocking = Some(BufferTimes {
        before_event: 15,
        after_event: 0,
    });
    meeting
}

pub fn planning_input() -> PlanningInput {
    PlanningInput {
        host_id: "host".to_string(),
        host_timezone: HOST_TZ.to_string(),
        window_start: at(5, 8, 0),
        window_end: at(5, 17, 0),
        attendees: vec![AttendeeRef {
            user_id: "guest".to_string(),
            timezone: GUEST_TZ.to_string(),
            is_external: true,
        }],
        new_events: vec![meeting()],
        meeting: None,
        reminder_minutes: Vec::new(),
        replan_event_id: None,
    }
}

/// Solver answer placing every requested part of `event_id` back to back from
/// `start` (host time) on 2025-05-05.
pub fn assign(request: &PlannerRequest, event_id: &str, start: NaiveTime) -> Vec<PlannerResponsePart> {
    let mut parts: Vec<_> = request
        .event_parts
        .iter()
        .filter(|record| record.event_id == event_id)
        .collect();
    parts.sort_by_key(|record| record.part);

    let date = NaiveDate::from_ymd_opt(2025, 5, 5).expect("date");
    parts
        .iter()
        .enumerate()
        .map(|(offset, record)| {
            let slot_start = date.and_time(start) + chrono::Duration::minutes(15 * offset as i64);
            let slot_end = slot_start + chrono::Duration::minutes(15);
            PlannerResponsePart {
                event_id: record.event_id.clone(),
                part: record.part,
                last_part: record.last_part,
                timeslot: AssignedTimeslot {
                    day_of_week: DayOfWeek::of(date),
                    start_time: slot_start.time(),
                    end_time: slot_end.time(),
                    month_day: MonthDay::new(5, 5),
                    host_id: Some("host".to_string()),
                },
                start_date: None,
                end_date: None,
                group_id: Some(record.group_id.clone()),
                user_id: Some(record.user_id.clone()),
            }
        })
        .collect()
}

pub fn t(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("time")
}
