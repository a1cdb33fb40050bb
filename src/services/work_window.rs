use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use chrono_tz::Tz;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::models::event::Event;
use crate::models::planner::{
    UserConstraint, EXTERNAL_MAX_NUMBER_OF_MEETINGS, EXTERNAL_MAX_WORK_LOAD_PERCENT,
    EXTERNAL_MIN_NUMBER_OF_BREAKS,
};
use crate::models::preference::WorkPreference;
use crate::models::timeslot::{DayOfWeek, Granularity, WorkTime};
use crate::services::schedule_utils::{event_timezone, minutes_from_midnight, shift_timezone};
use crate::services::time_quantizer::{ceil_end_of_day, floor_time};

/// A user's working hours on one host-calendar day, in the host timezone.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkWindow {
    pub date: NaiveDate,
    pub day_of_week: DayOfWeek,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub working_hours: f64,
}

impl WorkWindow {
    pub fn start_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start)
    }

    pub fn end_at(&self) -> NaiveDateTime {
        self.date.and_time(self.end)
    }

    pub fn total_minutes(&self) -> i64 {
        minutes_from_midnight(self.end) - minutes_from_midnight(self.start)
    }

    pub fn contains(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        start >= self.start_at() && end <= self.end_at()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendeeKind {
    Host,
    Internal,
    External,
}

/// Where a user's working hours come from.
pub trait PreferenceSource: Send + Sync {
    fn user_id(&self) -> &str;

    fn kind(&self) -> AttendeeKind;

    fn timezone(&self) -> Tz;

    /// Declared preference record, when one exists.
    fn preference(&self) -> Option<&WorkPreference>;

    /// Working window on `host_date`. `Ok(None)` means the user has no window that day.
    fn work_window(&self, host_date: NaiveDate, host_tz: Tz) -> AppResult<Option<WorkWindow>>;

    /// One row per weekday the user works, in the host timezone.
    fn work_times(&self, host_id: &str, host_tz: Tz, reference: NaiveDate) -> AppResult<Vec<WorkTime>>;

    fn user_constraint(&self, host_id: &str, work_times: Vec<WorkTime>) -> UserConstraint;
}

/// Weekly schedule declared in a [`WorkPreference`].
#[derive(Debug, Clone)]
pub struct DeclaredPreferences {
    preference: WorkPreference,
    timezone: Tz,
    kind: AttendeeKind,
}

impl DeclaredPreferences {
    pub fn new(preference: WorkPreference, timezone: Tz, kind: AttendeeKind) -> Self {
        Self {
            preference,
            timezone,
            kind,
        }
    }

    fn bounds_on(&self, user_date: NaiveDate) -> AppResult<(NaiveDateTime, NaiveDateTime)> {
        let iso_day = user_date.weekday().number_from_monday();
        let (start, end) = match (
            self.preference.start_for(iso_day),
            self.preference.end_for(iso_day),
        ) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                return Err(AppError::validation_with_details(
                    "缺少该工作日的偏好设置",
                    json!({"userId": self.preference.user_id, "isoDay": iso_day}),
                ))
            }
        };

        let start_time = NaiveTime::from_hms_opt(start.hour, start.minutes, 0);
        let end_time = NaiveTime::from_hms_opt(end.hour, end.minutes, 0);
        match (start_time, end_time) {
            (Some(start_time), Some(end_time)) if end_time > start_time => {
                Ok((user_date.and_time(start_time), user_date.and_time(end_time)))
            }
            _ => Err(AppError::validation_with_details(
                "工作时间设置无效",
                json!({"userId": self.preference.user_id, "isoDay": iso_day}),
            )),
        }
    }
}

impl PreferenceSource for DeclaredPreferences {
    fn user_id(&self) -> &str {
        &self.preference.user_id
    }

    fn kind(&self) -> AttendeeKind {
        self.kind
    }

    fn timezone(&self) -> Tz {
        self.timezone
    }

    fn preference(&self) -> Option<&WorkPreference> {
        Some(&self.preference)
    }

    fn work_window(&self, host_date: NaiveDate, host_tz: Tz) -> AppResult<Option<WorkWindow>> {
        let host_noon = host_date.and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN));
        let user_date = shift_timezone(host_noon, host_tz, self.timezone)?.date();
        let (start, end) = self.bounds_on(user_date)?;
        let start = shift_timezone(start, self.timezone, host_tz)?.time();
        let end = shift_timezone(end, self.timezone, host_tz)?.time();

        if end <= start {
            return Err(AppError::validation_with_details(
                "工作时间在主持人时区跨越午夜",
                json!({"userId": self.user_id(), "date": host_date.to_string()}),
            ));
        }

        let iso_day = user_date.weekday().number_from_monday();
        let working_hours = self.preference.working_hours_for(iso_day).unwrap_or_default();

        Ok(Some(WorkWindow {
            date: host_date,
            day_of_week: DayOfWeek::of(host_date),
            start,
            end,
            working_hours,
        }))
    }

    fn work_times(&self, host_id: &str, host_tz: Tz, reference: NaiveDate) -> AppResult<Vec<WorkTime>> {
        let mut work_times = Vec::with_capacity(7);
        for offset in 0..7 {
            let user_date = reference + Duration::days(offset);
            let day_of_week = DayOfWeek::of(user_date);
            let (start, end) = match self.bounds_on(user_date) {
                Ok(bounds) => bounds,
                Err(_) => {
                    warn!(
                        target: "app::planner",
                        user_id = %self.user_id(),
                        day = %day_of_week,
                        "skipping weekday without declared work hours"
                    );
                    continue;
                }
            };
            work_times.push(WorkTime {
                day_of_week,
                start_time: shift_timezone(start, self.timezone, host_tz)?.time(),
                end_time: shift_timezone(end, self.timezone, host_tz)?.time(),
                host_id: host_id.to_string(),
                user_id: self.user_id().to_string(),
            });
        }
        work_times.sort_by_key(|work_time| work_time.day_of_week);
        Ok(work_times)
    }

    fn user_constraint(&self, host_id: &str, work_times: Vec<WorkTime>) -> UserConstraint {
        UserConstraint {
            id: self.user_id().to_string(),
            host_id: host_id.to_string(),
            max_work_load_percent: self.preference.max_work_load_percent,
            back_to_back_meetings: self.preference.back_to_back_meetings,
            max_number_of_meetings: self.preference.max_number_of_meetings,
            min_number_of_breaks: self.preference.min_number_of_breaks,
            work_times,
        }
    }
}

/// Working hours inferred from the spread of a participant's existing events.
#[derive(Debug, Clone)]
pub struct ObservedEvents {
    user_id: String,
    events: Vec<Event>,
    timezone: Tz,
    granularity: Granularity,
}

impl ObservedEvents {
    pub fn new(
        user_id: impl Into<String>,
        events: Vec<Event>,
        timezone: Tz,
        granularity: Granularity,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            events,
            timezone,
            granularity,
        }
    }

    /// Earliest start and latest end, by timestamp, among events falling on
    /// `day_of_week` in the host timezone. The flag marks a latest event that runs past midnight.
    fn spread_for(&self, day_of_week: DayOfWeek, host_tz: Tz) -> Option<(NaiveDateTime, NaiveDateTime, bool)> {
        let mut spread: Option<(NaiveDateTime, NaiveDateTime, bool)> = None;
        for event in &self.events {
            if event.all_day {
                continue;
            }
            let Ok(tz) = event_timezone(event) else {
                continue;
            };
            let (Ok(start), Ok(end)) = (
                shift_timezone(event.start_date, tz, host_tz),
                shift_timezone(event.end_date, tz, host_tz),
            ) else {
                continue;
            };
            if DayOfWeek::of(start.date()) != day_of_week {
                continue;
            }
            let overnight = end.date() > start.date();
            spread = Some(match spread {
                None => (start, end, overnight),
                Some((min_start, max_end, max_overnight)) => {
                    let min_start = if start < min_start { start } else { min_start };
                    if end > max_end {
                        (min_start, end, overnight)
                    } else {
                        (min_start, max_end, max_overnight)
                    }
                }
            });
        }
        spread
    }

    fn bounds_for(&self, day_of_week: DayOfWeek, host_tz: Tz) -> Option<(NaiveTime, NaiveTime)> {
        let (min_start, max_end, overnight) = self.spread_for(day_of_week, host_tz)?;
        let start = floor_time(min_start.time(), self.granularity);
        let last_minute = if overnight {
            NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN)
        } else {
            max_end.time()
        };
        let end = ceil_end_of_day(last_minute, self.granularity);
        if end <= start {
            debug!(
                target: "app::planner",
                user_id = %self.user_id,
                day = %day_of_week,
                "observed window collapsed after rounding"
            );
            return None;
        }
        Some((start, end))
    }
}

impl PreferenceSource for ObservedEvents {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn kind(&self) -> AttendeeKind {
        AttendeeKind::External
    }

    fn timezone(&self) -> Tz {
        self.timezone
    }

    fn preference(&self) -> Option<&WorkPreference> {
        None
    }

    fn work_window(&self, host_date: NaiveDate, host_tz: Tz) -> AppResult<Option<WorkWindow>> {
        let day_of_week = DayOfWeek::of(host_date);
        Ok(self.bounds_for(day_of_week, host_tz).map(|(start, end)| WorkWindow {
            date: host_date,
            day_of_week,
            start,
            end,
            working_hours: (minutes_from_midnight(end) - minutes_from_midnight(start)) as f64 / 60.0,
        }))
    }

    fn work_times(&self, host_id: &str, host_tz: Tz, _reference: NaiveDate) -> AppResult<Vec<WorkTime>> {
        Ok(DayOfWeek::ALL
            .iter()
            .filter_map(|day| {
                self.bounds_for(*day, host_tz).map(|(start_time, end_time)| WorkTime {
                    day_of_week: *day,
                    start_time,
                    end_time,
                    host_id: host_id.to_string(),
                    user_id: self.user_id.clone(),
                })
            })
            .collect())
    }

    fn user_constraint(&self, host_id: &str, work_times: Vec<WorkTime>) -> UserConstraint {
        UserConstraint {
            id: self.user_id.clone(),
            host_id: host_id.to_string(),
            max_work_load_percent: EXTERNAL_MAX_WORK_LOAD_PERCENT,
            back_to_back_meetings: false,
            max_number_of_meetings: EXTERNAL_MAX_NUMBER_OF_MEETINGS,
            min_number_of_breaks: EXTERNAL_MIN_NUMBER_OF_BREAKS,
            work_times,
        }
    }
}
