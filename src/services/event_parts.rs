use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::models::event::{Event, EventPart};
use crate::models::timeslot::Granularity;
use crate::services::schedule_utils::{duration_minutes, event_timezone};

/// Part lengths for `total_minutes`: full quanta, then one trailing remainder part.
pub fn split_minutes(total_minutes: i64, quantum: u32) -> Vec<i64> {
    if total_minutes <= 0 || quantum == 0 {
        return Vec::new();
    }
    let quantum = i64::from(quantum);
    let full_parts = total_minutes / quantum;
    let remainder = total_minutes % quantum;

    let mut lengths = vec![quantum; full_parts as usize];
    if remainder > 0 {
        lengths.push(remainder);
    }
    lengths
}

pub fn generate_event_parts(
    event: &Event,
    host_id: &str,
    granularity: Granularity,
) -> AppResult<Vec<EventPart>> {
    let tz = event_timezone(event)?;
    let minutes = duration_minutes(event.start_date, event.end_date, tz)?;
    if minutes <= 0 {
        return Err(AppError::validation_with_details(
            "事件时长必须大于 0",
            json!({"eventId": event.id, "minutes": minutes}),
        ));
    }

    let lengths = split_minutes(minutes, granularity.minutes());
    let last_part = lengths.len() as u32;

    Ok((1..=last_part)
        .map(|part| EventPart {
            group_id: event.id.clone(),
            event_id: event.id.clone(),
            part,
            last_part,
            meeting_part: part,
            meeting_last_part: last_part,
            host_id: host_id.to_string(),
            event: event.clone(),
        })
        .collect())
}
