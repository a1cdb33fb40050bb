use serde::{Deserialize, Serialize};

pub const DEFAULT_BREAK_COLOR: &str = "#F7EBF7";
pub const MIN_BREAK_MINUTES: i64 = 15;

/// One weekday boundary of a working day, in the owner's timezone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DayTime {
    /// ISO weekday, Monday = 1.
    pub day: u32,
    pub hour: u32,
    pub minutes: u32,
}

impl DayTime {
    pub fn minutes_of_day(&self) -> i64 {
        i64::from(self.hour) * 60 + i64::from(self.minutes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkPreference {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub start_times: Vec<DayTime>,
    #[serde(default)]
    pub end_times: Vec<DayTime>,
    #[serde(default)]
    pub break_length: i64,
    #[serde(default)]
    pub min_number_of_breaks: i64,
    #[serde(default = "default_max_work_load_percent")]
    pub max_work_load_percent: i64,
    #[serde(default = "default_max_number_of_meetings")]
    pub max_number_of_meetings: i64,
    #[serde(default)]
    pub back_to_back_meetings: bool,
    #[serde(default)]
    pub break_color: Option<String>,
    #[serde(default)]
    pub reminders: Vec<i64>,
    #[serde(default)]
    pub copy_availability: bool,
    #[serde(default)]
    pub copy_time_blocking: bool,
    #[serde(default)]
    pub copy_time_preference: bool,
    #[serde(default)]
    pub copy_reminders: bool,
    #[serde(default)]
    pub copy_priority_level: bool,
    #[serde(default)]
    pub copy_modifiable: bool,
    #[serde(default)]
    pub copy_categories: bool,
    #[serde(default)]
    pub copy_is_break: bool,
    #[serde(default)]
    pub copy_is_meeting: bool,
    #[serde(default)]
    pub copy_is_external_meeting: bool,
    #[serde(default)]
    pub copy_color: bool,
}

fn default_max_work_load_percent() -> i64 {
    85
}

fn default_max_number_of_meetings() -> i64 {
    8
}

impl WorkPreference {
    pub fn start_for(&self, iso_day: u32) -> Option<&DayTime> {
        self.start_times.iter().find(|entry| entry.day == iso_day)
    }

    pub fn end_for(&self, iso_day: u32) -> Option<&DayTime> {
        self.end_times.iter().find(|entry| entry.day == iso_day)
    }

    /// Declared working hours for an ISO weekday.
    pub fn working_hours_for(&self, iso_day: u32) -> Option<f64> {
        let start = self.start_for(iso_day)?;
        let end = self.end_for(iso_day)?;
        Some((end.minutes_of_day() - start.minutes_of_day()) as f64 / 60.0)
    }

    pub fn break_color_or_default(&self) -> String {
        self.break_color
            .clone()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BREAK_COLOR.to_string())
    }

    /// Same weekly schedule on every ISO day. Handy for fixtures.
    pub fn uniform(
        user_id: impl Into<String>,
        start: (u32, u32),
        end: (u32, u32),
    ) -> Self {
        let user_id = user_id.into();
        Self {
            id: format!("pref-{user_id}"),
            user_id,
            start_times: (1..=7)
                .map(|day| DayTime {
                    day,
                    hour: start.0,
                    minutes: start.1,
                })
                .collect(),
            end_times: (1..=7)
                .map(|day| DayTime {
                    day,
                    hour: end.0,
                    minutes: end.1,
                })
                .collect(),
            break_length: 30,
            min_number_of_breaks: 0,
            max_work_load_percent: default_max_work_load_percent(),
            max_number_of_meetings: default_max_number_of_meetings(),
            back_to_back_meetings: false,
            break_color: None,
            reminders: Vec::new(),
            copy_availability: false,
            copy_time_blocking: false,
            copy_time_preference: false,
            copy_reminders: false,
            copy_priority_level: false,
            copy_modifiable: false,
            copy_categories: false,
            copy_is_break: false,
            copy_is_meeting: false,
            copy_is_external_meeting: false,
            copy_color: false,
        }
    }
}
