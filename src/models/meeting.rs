use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::models::event::BufferTimes;
use crate::models::timeslot::hh_mm;

/// A meeting the host wants placed, before any calendar copy exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MeetingAssist {
    pub id: String,
    /// Host calendar.
    pub calendar_id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Minutes.
    pub duration: i64,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub buffer_time: Option<BufferTimes>,
    #[serde(default)]
    pub preferred_time_ranges: Vec<MeetingPreferredTimeRange>,
}

fn default_priority() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MeetingPreferredTimeRange {
    /// ISO weekday, 1 = Monday.
    #[serde(default)]
    pub day_of_week: Option<u32>,
    #[serde(default, with = "hh_mm::option")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "hh_mm::option")]
    pub end_time: Option<NaiveTime>,
}
