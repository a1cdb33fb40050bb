use chrono::{NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::models::timeslot::{Granularity, MonthDay, TimeSlot};
use crate::services::schedule_utils::{minutes_from_midnight, to_naive_time};
use crate::services::time_quantizer::floor_time;
use crate::services::work_window::{PreferenceSource, WorkWindow};

/// Slots covering one day's work window. `first_day_now` is set only for the
/// first day of a planning window and clips the day to that instant.
/// A window that is not a whole number of quanta ends with one shorter slot.
pub fn generate_time_slots(
    window: &WorkWindow,
    host_id: &str,
    granularity: Granularity,
    first_day_now: Option<NaiveDateTime>,
) -> Vec<TimeSlot> {
    let mut start = window.start;
    let mut month_day = None;

    if let Some(now) = first_day_now {
        if now >= window.end_at() {
            debug!(target: "app::planner", date = %window.date, "first day already past work end");
            return Vec::new();
        }
        if now > window.start_at() {
            let floored = floor_time(now.time(), granularity);
            start = if floored > window.start { floored } else { window.start };
        }
        month_day = Some(MonthDay::of(window.date));
    }

    let quantum = granularity.minutes() as i64;
    let start_minutes = minutes_from_midnight(start);
    let total_minutes = minutes_from_midnight(window.end) - start_minutes;
    if total_minutes <= 0 {
        return Vec::new();
    }

    (0..total_minutes)
        .step_by(quantum as usize)
        .map(|offset| TimeSlot {
            day_of_week: window.day_of_week,
            start_time: to_naive_time((start_minutes + offset) as u32),
            end_time: to_naive_time((start_minutes + (offset + quantum).min(total_minutes)) as u32),
            host_id: host_id.to_string(),
            month_day,
        })
        .collect()
}

/// Slots for each day in `days`, in order. Days without a usable window contribute nothing.
pub fn generate_time_slots_for_days(
    source: &dyn PreferenceSource,
    days: &[NaiveDate],
    host_tz: Tz,
    host_id: &str,
    granularity: Granularity,
    now: NaiveDateTime,
) -> Vec<TimeSlot> {
    let mut slots = Vec::new();
    for (index, day) in days.iter().enumerate() {
        let window = match source.work_window(*day, host_tz) {
            Ok(Some(window)) => window,
            Ok(None) => continue,
            Err(error) => {
                warn!(
                    target: "app::planner",
                    user_id = %source.user_id(),
                    date = %day,
                    %error,
                    "no work window for day, skipping slots"
                );
                continue;
            }
        };
        let first_day_now = if index == 0 { Some(now) } else { None };
        slots.extend(generate_time_slots(&window, host_id, granularity, first_day_now));
    }
    slots
}
