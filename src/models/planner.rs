use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::event::{BufferPair, Event, Reminder};
use crate::models::timeslot::{hh_mm, DayOfWeek, Granularity, MonthDay, TimeSlot, WorkTime};

pub const EXTERNAL_MAX_WORK_LOAD_PERCENT: i64 = 100;
pub const EXTERNAL_MAX_NUMBER_OF_MEETINGS: i64 = 99;
pub const EXTERNAL_MIN_NUMBER_OF_BREAKS: i64 = 0;

/// Per-user constraints the solver enforces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserConstraint {
    pub id: String,
    pub host_id: String,
    pub max_work_load_percent: i64,
    pub back_to_back_meetings: bool,
    pub max_number_of_meetings: i64,
    pub min_number_of_breaks: i64,
    pub work_times: Vec<WorkTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlannerPreferredTimeRange {
    #[serde(default)]
    pub day_of_week: Option<DayOfWeek>,
    #[serde(with = "hh_mm")]
    pub start_time: NaiveTime,
    #[serde(with = "hh_mm")]
    pub end_time: NaiveTime,
    pub event_id: String,
    pub user_id: String,
    pub host_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlannerEventSummary {
    pub id: String,
    pub user_id: String,
    pub host_id: String,
    #[serde(default)]
    pub preferred_time_ranges: Vec<PlannerPreferredTimeRange>,
    #[serde(default)]
    pub event_type: Option<String>,
}

/// Solver-facing form of an event part. Times are in the host timezone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventPartRecord {
    pub group_id: String,
    pub event_id: String,
    pub part: u32,
    pub last_part: u32,
    pub meeting_part: u32,
    pub meeting_last_part: u32,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub user_id: String,
    pub host_id: String,
    pub user: UserConstraint,
    pub priority: i64,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub soft_deadline: Option<NaiveDateTime>,
    #[serde(default)]
    pub hard_deadline: Option<NaiveDateTime>,
    #[serde(default)]
    pub meeting_id: Option<String>,
    pub is_pre_event: bool,
    pub is_post_event: bool,
    #[serde(default)]
    pub for_event_id: Option<String>,
    #[serde(default)]
    pub positive_impact_score: Option<i64>,
    #[serde(default)]
    pub negative_impact_score: Option<i64>,
    #[serde(default)]
    pub positive_impact_day_of_week: Option<DayOfWeek>,
    #[serde(default, with = "hh_mm::option")]
    pub positive_impact_time: Option<NaiveTime>,
    #[serde(default)]
    pub negative_impact_day_of_week: Option<DayOfWeek>,
    #[serde(default, with = "hh_mm::option")]
    pub negative_impact_time: Option<NaiveTime>,
    pub modifiable: bool,
    #[serde(default)]
    pub preferred_day_of_week: Option<DayOfWeek>,
    #[serde(default, with = "hh_mm::option")]
    pub preferred_time: Option<NaiveTime>,
    pub is_meeting: bool,
    pub is_external_meeting: bool,
    pub is_external_meeting_modifiable: bool,
    pub is_meeting_modifiable: bool,
    pub daily_task_list: bool,
    pub weekly_task_list: bool,
    pub gap: bool,
    #[serde(default, with = "hh_mm::option")]
    pub preferred_start_time_range: Option<NaiveTime>,
    #[serde(default, with = "hh_mm::option")]
    pub preferred_end_time_range: Option<NaiveTime>,
    #[serde(default)]
    pub total_working_hours: Option<f64>,
    #[serde(default)]
    pub recurring_event_id: Option<String>,
    pub event: PlannerEventSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlannerRequest {
    pub singleton_id: String,
    pub host_id: String,
    pub timeslots: Vec<TimeSlot>,
    pub user_list: Vec<UserConstraint>,
    pub event_parts: Vec<EventPartRecord>,
    pub file_key: String,
    pub delay: u64,
    pub call_back_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssignedTimeslot {
    pub day_of_week: DayOfWeek,
    #[serde(with = "hh_mm")]
    pub start_time: NaiveTime,
    #[serde(with = "hh_mm")]
    pub end_time: NaiveTime,
    #[serde(default)]
    pub month_day: Option<MonthDay>,
    #[serde(default)]
    pub host_id: Option<String>,
}

/// One solver assignment of an event part to a timeslot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlannerResponsePart {
    pub event_id: String,
    pub part: u32,
    pub last_part: u32,
    pub timeslot: AssignedTimeslot,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Everything a callback needs to reconcile a run, written next to the request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlannerRunSnapshot {
    pub singleton_id: String,
    pub host_id: String,
    pub host_timezone: String,
    pub granularity: Granularity,
    pub request: PlannerRequest,
    #[serde(default)]
    pub all_events: Vec<Event>,
    #[serde(default)]
    pub breaks: Vec<Event>,
    #[serde(default)]
    pub old_events: Vec<Event>,
    #[serde(default)]
    pub new_buffer_pairs: Vec<BufferPair>,
    #[serde(default)]
    pub new_reminders: Vec<Reminder>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Submitted,
    Reconciled,
    Failed,
    Stale,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Submitted => "submitted",
            RunStatus::Reconciled => "reconciled",
            RunStatus::Failed => "failed",
            RunStatus::Stale => "stale",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "submitted" => Ok(RunStatus::Submitted),
            "reconciled" => Ok(RunStatus::Reconciled),
            "failed" => Ok(RunStatus::Failed),
            "stale" => Ok(RunStatus::Stale),
            other => Err(format!("unknown run status `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlannerRunRecord {
    pub singleton_id: String,
    pub host_id: String,
    pub file_key: String,
    pub status: RunStatus,
    pub callback_deadline: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
