use chrono::{Datelike, Duration, NaiveDateTime};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::event::{Event, EventMethod, PreferredTimeRange};
use crate::models::meeting::{MeetingAssist, MeetingPreferredTimeRange};
use crate::services::schedule_utils::add_minutes;

/// One participant's calendar copy target. Without a `calendar_id` the copy is
/// filed under the participant's user id, keeping sibling ids distinct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingCopyTarget {
    pub user_id: String,
    pub calendar_id: Option<String>,
}

/// Initial start for a meeting copy inside `[window_start, window_end]`.
///
/// A preferred weekday moves the start to that ISO day of the window's week, or
/// the week after or before when that day falls outside the window. A preferred
/// start time then replaces the clock time.
pub fn meeting_start_in_window(
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
    range: Option<&MeetingPreferredTimeRange>,
) -> NaiveDateTime {
    let mut start = window_start;

    if let Some(day_of_week) = range.and_then(|range| range.day_of_week).filter(|day| (1..=7).contains(day)) {
        let offset = i64::from(day_of_week) - i64::from(window_start.weekday().number_from_monday());
        let same_week = window_start + Duration::days(offset);
        start = [same_week, same_week + Duration::weeks(1), same_week - Duration::weeks(1)]
            .into_iter()
            .find(|candidate| *candidate >= window_start && *candidate <= window_end)
            .unwrap_or(same_week);
    }

    if let Some(time) = range.and_then(|range| range.start_time) {
        start = start.date().and_time(time);
    }
    start
}

fn meeting_event(
    meeting: &MeetingAssist,
    target: &MeetingCopyTarget,
    calendar_id: String,
    provider_id: &str,
    start: NaiveDateTime,
    host_timezone: &str,
) -> AppResult<Event> {
    let id = format!("{provider_id}#{calendar_id}");
    let end = add_minutes(start, meeting.duration)?;

    let mut event = Event::new(id.clone(), target.user_id.clone(), start, end, host_timezone);
    event.event_id = Some(provider_id.to_string());
    event.calendar_id = Some(calendar_id);
    event.meeting_id = Some(meeting.id.clone());
    event.title = meeting.summary.clone();
    event.notes = meeting.notes.clone();
    event.priority = meeting.priority;
    event.duration = Some(meeting.duration);
    event.is_meeting = true;
    event.time_blocking = meeting.buffer_time;
    event.method = Some(EventMethod::Create);
    event.preferred_time_ranges = meeting
        .preferred_time_ranges
        .iter()
        .filter_map(|range| {
            Some(PreferredTimeRange {
                id: Uuid::new_v4().to_string(),
                event_id: id.clone(),
                user_id: target.user_id.clone(),
                day_of_week: range.day_of_week,
                start_time: range.start_time?,
                end_time: range.end_time?,
            })
        })
        .collect();
    Ok(event)
}

fn validate_meeting(
    meeting: &MeetingAssist,
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
) -> AppResult<()> {
    if meeting.duration <= 0 {
        return Err(AppError::validation_with_details(
            "会议时长必须大于零",
            json!({"meetingId": meeting.id, "duration": meeting.duration}),
        ));
    }
    if window_end <= window_start {
        return Err(AppError::validation("排程窗口结束时间必须晚于开始时间"));
    }
    Ok(())
}

/// The host's copy of `meeting`, on the meeting's own calendar.
pub fn generate_new_meeting_event_for_host(
    meeting: &MeetingAssist,
    host_id: &str,
    provider_id: &str,
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
    host_timezone: &str,
) -> AppResult<Event> {
    validate_meeting(meeting, window_start, window_end)?;
    let start = meeting_start_in_window(window_start, window_end, meeting.preferred_time_ranges.first());
    let target = MeetingCopyTarget {
        user_id: host_id.to_string(),
        calendar_id: Some(meeting.calendar_id.clone()),
    };
    meeting_event(meeting, &target, meeting.calendar_id.clone(), provider_id, start, host_timezone)
}

/// An attendee's copy of `meeting`, on their calendar when they have one.
pub fn generate_new_meeting_event_for_attendee(
    meeting: &MeetingAssist,
    attendee: &MeetingCopyTarget,
    provider_id: &str,
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
    host_timezone: &str,
) -> AppResult<Event> {
    validate_meeting(meeting, window_start, window_end)?;
    let start = meeting_start_in_window(window_start, window_end, meeting.preferred_time_ranges.first());
    let calendar_id = attendee
        .calendar_id
        .clone()
        .unwrap_or_else(|| attendee.user_id.clone());
    meeting_event(meeting, attendee, calendar_id, provider_id, start, host_timezone)
}

/// Host copy followed by one copy per attendee. Every copy shares one fresh
/// provider id, so the copies are `{providerId}#{calendarId}` siblings.
pub fn generate_meeting_events(
    meeting: &MeetingAssist,
    host_id: &str,
    attendees: &[MeetingCopyTarget],
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
    host_timezone: &str,
) -> AppResult<Vec<Event>> {
    let provider_id = Uuid::new_v4().to_string();
    let mut events = vec![generate_new_meeting_event_for_host(
        meeting,
        host_id,
        &provider_id,
        window_start,
        window_end,
        host_timezone,
    )?];
    for attendee in attendees.iter().filter(|attendee| attendee.user_id != host_id) {
        events.push(generate_new_meeting_event_for_attendee(
            meeting,
            attendee,
            &provider_id,
            window_start,
            window_end,
            host_timezone,
        )?);
    }
    debug!(
        target: "app::planner",
        meeting_id = %meeting.id,
        %provider_id,
        copies = events.len(),
        "meeting copies generated"
    );
    Ok(events)
}
