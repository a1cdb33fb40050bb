use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use chrono_tz::Tz;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::models::event::Event;

pub fn parse_timezone(value: &str) -> AppResult<Tz> {
    value.trim().parse::<Tz>().map_err(|err| {
        AppError::validation_with_details(
            "无效的时区",
            json!({"value": value, "error": err.to_string()}),
        )
    })
}

pub fn event_timezone(event: &Event) -> AppResult<Tz> {
    match event.timezone.as_deref() {
        Some(value) if !value.trim().is_empty() => parse_timezone(value),
        _ => Err(AppError::validation_with_details(
            "事件缺少时区",
            json!({"eventId": event.id}),
        )),
    }
}

/// Pins a wall-clock value to `tz`. Ambiguous times take the earlier instant;
/// times inside a DST gap move forward by the gap.
pub fn anchor(value: NaiveDateTime, tz: Tz) -> AppResult<DateTime<Tz>> {
    match tz.from_local_datetime(&value) {
        LocalResult::Single(dt) => Ok(dt),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest),
        LocalResult::None => {
            let shifted = value + Duration::hours(1);
            match tz.from_local_datetime(&shifted) {
                LocalResult::Single(dt) => Ok(dt),
                LocalResult::Ambiguous(earliest, _) => Ok(earliest),
                LocalResult::None => Err(AppError::validation_with_details(
                    "时间在该时区不存在",
                    json!({"value": value.to_string(), "timezone": tz.name()}),
                )),
            }
        }
    }
}

/// Re-expresses a wall-clock value of `from` as the wall-clock value of `to`.
pub fn shift_timezone(value: NaiveDateTime, from: Tz, to: Tz) -> AppResult<NaiveDateTime> {
    Ok(anchor(value, from)?.with_timezone(&to).naive_local())
}

pub fn duration_minutes(start: NaiveDateTime, end: NaiveDateTime, tz: Tz) -> AppResult<i64> {
    let start = anchor(start, tz)?;
    let end = anchor(end, tz)?;
    Ok(end.signed_duration_since(start).num_minutes())
}

pub fn add_minutes(value: NaiveDateTime, minutes: i64) -> AppResult<NaiveDateTime> {
    value
        .checked_add_signed(Duration::minutes(minutes))
        .ok_or_else(|| AppError::validation("时间计算超出范围"))
}

pub fn overlaps(
    a_start: NaiveDateTime,
    a_end: NaiveDateTime,
    b_start: NaiveDateTime,
    b_end: NaiveDateTime,
) -> bool {
    a_start < b_end && b_start < a_end
}

pub fn minutes_from_midnight(time: NaiveTime) -> i64 {
    (time.hour() as i64) * 60 + (time.minute() as i64)
}

pub fn to_naive_time(total_minutes: u32) -> NaiveTime {
    let total_minutes = total_minutes.min(24 * 60 - 1);
    NaiveTime::from_hms_opt(total_minutes / 60, total_minutes % 60, 0).unwrap_or(NaiveTime::MIN)
}

/// Inclusive list of calendar days from `start` to `end`.
pub fn days_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|day| *day <= end).collect()
}
