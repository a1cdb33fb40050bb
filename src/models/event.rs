use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::models::timeslot::hh_mm;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventMethod {
    Create,
    Update,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BufferTimes {
    #[serde(default)]
    pub before_event: i64,
    #[serde(default)]
    pub after_event: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreferredTimeRange {
    pub id: String,
    pub event_id: String,
    pub user_id: String,
    #[serde(default)]
    pub day_of_week: Option<u32>,
    #[serde(with = "hh_mm")]
    pub start_time: NaiveTime,
    #[serde(with = "hh_mm")]
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: String,
    pub user_id: String,
    pub event_id: String,
    #[serde(default)]
    pub timezone: Option<String>,
    pub minutes: i64,
    #[serde(default)]
    pub use_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    pub id: String,
    pub event_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_external: bool,
}

/// A calendar occurrence. `start_date`/`end_date` are wall-clock values in `timezone`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub calendar_id: Option<String>,
    /// Provider-level id shared by every attendee copy of a meeting.
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub modifiable: bool,
    #[serde(default)]
    pub is_meeting: bool,
    #[serde(default)]
    pub is_meeting_modifiable: bool,
    #[serde(default)]
    pub is_external_meeting: bool,
    #[serde(default)]
    pub is_external_meeting_modifiable: bool,
    #[serde(default)]
    pub is_break: bool,
    #[serde(default)]
    pub is_pre_event: bool,
    #[serde(default)]
    pub is_post_event: bool,
    #[serde(default)]
    pub pre_event_id: Option<String>,
    #[serde(default)]
    pub post_event_id: Option<String>,
    #[serde(default)]
    pub for_event_id: Option<String>,
    #[serde(default)]
    pub meeting_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub recurring_event_id: Option<String>,
    #[serde(default)]
    pub daily_task_list: bool,
    #[serde(default)]
    pub weekly_task_list: bool,
    #[serde(default)]
    pub hard_deadline: Option<NaiveDateTime>,
    #[serde(default)]
    pub soft_deadline: Option<NaiveDateTime>,
    #[serde(default)]
    pub positive_impact_score: Option<i64>,
    #[serde(default)]
    pub positive_impact_day_of_week: Option<u32>,
    #[serde(default, with = "hh_mm::option")]
    pub positive_impact_time: Option<NaiveTime>,
    #[serde(default)]
    pub negative_impact_score: Option<i64>,
    #[serde(default)]
    pub negative_impact_day_of_week: Option<u32>,
    #[serde(default, with = "hh_mm::option")]
    pub negative_impact_time: Option<NaiveTime>,
    #[serde(default)]
    pub preferred_day_of_week: Option<u32>,
    #[serde(default, with = "hh_mm::option")]
    pub preferred_time: Option<NaiveTime>,
    #[serde(default, with = "hh_mm::option")]
    pub preferred_start_time_range: Option<NaiveTime>,
    #[serde(default, with = "hh_mm::option")]
    pub preferred_end_time_range: Option<NaiveTime>,
    #[serde(default)]
    pub preferred_time_ranges: Vec<PreferredTimeRange>,
    #[serde(default)]
    pub time_blocking: Option<BufferTimes>,
    #[serde(default)]
    pub background_color: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub method: Option<EventMethod>,
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        start_date: NaiveDateTime,
        end_date: NaiveDateTime,
        timezone: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            start_date,
            end_date,
            timezone: Some(timezone.into()),
            priority: 1,
            modifiable: true,
            ..Self::default()
        }
    }

    /// Provider id when known, otherwise the part of `id` before the calendar suffix.
    pub fn provider_id(&self) -> &str {
        match &self.event_id {
            Some(value) => value.as_str(),
            None => self.id.split('#').next().unwrap_or(self.id.as_str()),
        }
    }
}

/// Buffer events produced for one event that asked for prep or wrap-up time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BufferPair {
    pub new_event: Event,
    #[serde(default)]
    pub before_event: Option<Event>,
    #[serde(default)]
    pub after_event: Option<Event>,
}

/// A fixed-duration slice of an event, the unit the solver assigns to a timeslot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventPart {
    pub group_id: String,
    pub event_id: String,
    pub part: u32,
    pub last_part: u32,
    pub meeting_part: u32,
    pub meeting_last_part: u32,
    pub host_id: String,
    pub event: Event,
}

impl EventPart {
    /// Id of the event this part was cut from.
    pub fn id(&self) -> &str {
        &self.event.id
    }

    pub fn for_event_id(&self) -> Option<&str> {
        self.event.for_event_id.as_deref()
    }
}
