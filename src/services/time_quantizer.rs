use chrono::{NaiveTime, Timelike};

use crate::models::timeslot::Granularity;

/// Floor edge of the `[k*quantum, (k+1)*quantum)` bucket holding `minute`.
pub fn quantize(minute: u32, quantum: u32) -> u32 {
    let minute = minute.min(59);
    if quantum == 0 {
        return minute;
    }

    let mut bucket_start = 0;
    while bucket_start < 60 {
        if minute >= bucket_start && minute < bucket_start + quantum {
            return bucket_start;
        }
        bucket_start += quantum;
    }
    bucket_start - quantum
}

pub fn floor_time(time: NaiveTime, granularity: Granularity) -> NaiveTime {
    let minute = quantize(time.minute(), granularity.minutes());
    NaiveTime::from_hms_opt(time.hour(), minute, 0).unwrap_or(time)
}

/// Rounds an end-of-day time up to the end of its bucket. A bucket end of `:00`
/// rolls into the next hour while the hour is below 23.
pub fn ceil_end_of_day(time: NaiveTime, granularity: Granularity) -> NaiveTime {
    let quantum = granularity.minutes();
    let bucket_end = quantize(time.minute(), quantum) + quantum;
    let (hour, minute) = if bucket_end >= 60 {
        if time.hour() < 23 {
            (time.hour() + 1, 0)
        } else {
            (time.hour(), 0)
        }
    } else {
        (time.hour(), bucket_end)
    };
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(time)
}
