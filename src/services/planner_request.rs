use std::collections::HashSet;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use chrono_tz::Tz;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::event::{Event, EventPart};
use crate::models::planner::{
    EventPartRecord, PlannerEventSummary, PlannerPreferredTimeRange, PlannerRequest,
    UserConstraint,
};
use crate::models::timeslot::{DayOfWeek, Granularity, TimeSlot};
use crate::services::break_scheduler::generate_break_events_for_days;
use crate::services::buffer_stitcher::{stitch_post_buffers, stitch_pre_buffers};
use crate::services::event_parts::generate_event_parts;
use crate::services::schedule_utils::{
    days_between, duration_minutes, event_timezone, shift_timezone,
};
use crate::services::time_slots::generate_time_slots_for_days;
use crate::services::work_window::PreferenceSource;

const MAX_EVENT_MINUTES: i64 = 23 * 60;

/// Host, timezone and span of one planning run. `start` doubles as "now".
#[derive(Debug, Clone)]
pub struct PlanningWindow {
    pub host_id: String,
    pub host_timezone: Tz,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub granularity: Granularity,
}

impl PlanningWindow {
    pub fn days(&self) -> Vec<NaiveDate> {
        days_between(self.start.date(), self.end.date())
    }
}

/// Everything one attendee contributes to a run.
pub struct AttendeePlanInput<'a> {
    pub source: &'a dyn PreferenceSource,
    /// Events already on the attendee's calendar inside the window.
    pub events: Vec<Event>,
    /// New meeting, buffer and break events supplied by the caller.
    pub new_events: Vec<Event>,
    /// Recurring parents of any occurrences among `events`.
    pub recurring_parents: Vec<Event>,
    pub global_calendar_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOutput {
    pub user_list: Vec<UserConstraint>,
    pub event_parts: Vec<EventPartRecord>,
    pub all_events: Vec<Event>,
    pub breaks: Vec<Event>,
    pub timeslots: Vec<TimeSlot>,
}

/// Checks that an event can be planned for its owner. Failures exclude the event.
pub fn validate_event_dates(
    event: &Event,
    source: &dyn PreferenceSource,
    host_tz: Tz,
) -> AppResult<()> {
    let reject = |reason: &str| {
        Err(AppError::validation_with_details(
            "事件时间无效",
            json!({"eventId": event.id, "reason": reason}),
        ))
    };

    if event.all_day {
        return reject("all_day");
    }
    let tz = event_timezone(event)?;
    let minutes = duration_minutes(event.start_date, event.end_date, tz)?;
    if minutes == 0 {
        return reject("zero_duration");
    }
    if minutes < 0 {
        return reject("negative_duration");
    }
    if minutes > MAX_EVENT_MINUTES {
        return reject("longer_than_23_hours");
    }
    let ends_at_next_midnight = event.end_date.time() == NaiveTime::MIN
        && event.end_date.date().pred_opt() == Some(event.start_date.date());
    if event.end_date.date() != event.start_date.date() && !ends_at_next_midnight {
        return reject("spans_multiple_days");
    }

    let host_start = shift_timezone(event.start_date, tz, host_tz)?;
    let Some(window) = source.work_window(host_start.date(), host_tz)? else {
        return reject("no_work_window");
    };
    if host_start >= window.end_at() {
        return reject("starts_after_day_end");
    }
    if host_start < window.start_at() {
        return reject("starts_before_day_start");
    }
    Ok(())
}

fn shift_clock(time: NaiveTime, date: NaiveDate, from: Tz, to: Tz) -> AppResult<NaiveTime> {
    Ok(shift_timezone(date.and_time(time), from, to)?.time())
}

fn shift_optional_clock(
    time: Option<NaiveTime>,
    date: NaiveDate,
    from: Tz,
    to: Tz,
) -> AppResult<Option<NaiveTime>> {
    time.map(|value| shift_clock(value, date, from, to)).transpose()
}

/// Solver-facing record for one part, owned by the user described by `user`.
pub fn format_event_part(
    part: &EventPart,
    user: &UserConstraint,
    host_tz: Tz,
    total_working_hours: Option<f64>,
) -> AppResult<EventPartRecord> {
    let event = &part.event;
    let tz = event_timezone(event)?;
    let date = event.start_date.date();

    let preferred_time_ranges = event
        .preferred_time_ranges
        .iter()
        .map(|range| {
            Ok(PlannerPreferredTimeRange {
                day_of_week: range.day_of_week.and_then(DayOfWeek::from_iso),
                start_time: shift_clock(range.start_time, date, tz, host_tz)?,
                end_time: shift_clock(range.end_time, date, tz, host_tz)?,
                event_id: range.event_id.clone(),
                user_id: range.user_id.clone(),
                host_id: part.host_id.clone(),
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    Ok(EventPartRecord {
        group_id: part.group_id.clone(),
        event_id: part.event_id.clone(),
        part: part.part,
        last_part: part.last_part,
        meeting_part: part.meeting_part,
        meeting_last_part: part.meeting_last_part,
        start_date: shift_timezone(event.start_date, tz, host_tz)?,
        end_date: shift_timezone(event.end_date, tz, host_tz)?,
        user_id: event.user_id.clone(),
        host_id: part.host_id.clone(),
        user: user.clone(),
        priority: event.priority,
        task_id: event.task_id.clone(),
        soft_deadline: event.soft_deadline,
        hard_deadline: event.hard_deadline,
        meeting_id: event.meeting_id.clone(),
        is_pre_event: event.is_pre_event,
        is_post_event: event.is_post_event,
        for_event_id: event.for_event_id.clone(),
        positive_impact_score: event.positive_impact_score,
        negative_impact_score: event.negative_impact_score,
        positive_impact_day_of_week: event
            .positive_impact_day_of_week
            .and_then(DayOfWeek::from_iso),
        positive_impact_time: shift_optional_clock(event.positive_impact_time, date, tz, host_tz)?,
        negative_impact_day_of_week: event
            .negative_impact_day_of_week
            .and_then(DayOfWeek::from_iso),
        negative_impact_time: shift_optional_clock(event.negative_impact_time, date, tz, host_tz)?,
        modifiable: event.modifiable,
        preferred_day_of_week: event.preferred_day_of_week.and_then(DayOfWeek::from_iso),
        preferred_time: shift_optional_clock(event.preferred_time, date, tz, host_tz)?,
        is_meeting: event.is_meeting,
        is_external_meeting: event.is_external_meeting,
        is_external_meeting_modifiable: event.is_external_meeting_modifiable,
        is_meeting_modifiable: event.is_meeting_modifiable,
        daily_task_list: event.daily_task_list,
        weekly_task_list: event.weekly_task_list,
        gap: event.is_break,
        preferred_start_time_range: shift_optional_clock(
            event.preferred_start_time_range,
            date,
            tz,
            host_tz,
        )?,
        preferred_end_time_range: shift_optional_clock(
            event.preferred_end_time_range,
            date,
            tz,
            host_tz,
        )?,
        total_working_hours,
        recurring_event_id: event.recurring_event_id.clone(),
        event: PlannerEventSummary {
            id: event.id.clone(),
            user_id: event.user_id.clone(),
            host_id: part.host_id.clone(),
            preferred_time_ranges,
            event_type: event.event_type.clone(),
        },
    })
}

/// Pins an unmodifiable event to its own start when no preference was given.
pub fn set_preferred_time_for_unmodifiable_event(record: &mut EventPartRecord) {
    if record.modifiable || record.preferred_day_of_week.is_some() || record.preferred_time.is_some()
    {
        return;
    }
    record.preferred_day_of_week = Some(DayOfWeek::of(record.start_date.date()));
    record.preferred_time = Some(record.start_date.time());
}

pub fn tag_events_for_daily_or_weekly_task(
    records: Vec<EventPartRecord>,
    parents: &[Event],
) -> Vec<EventPartRecord> {
    records
        .into_iter()
        .map(|mut record| {
            let parent = record
                .recurring_event_id
                .as_deref()
                .and_then(|id| parents.iter().find(|parent| parent.id == id));
            if let Some(parent) = parent {
                if parent.weekly_task_list {
                    record.weekly_task_list = true;
                }
                if parent.daily_task_list {
                    record.daily_task_list = true;
                }
            }
            record
        })
        .collect()
}

fn uniq_by_id(events: Vec<Event>) -> Vec<Event> {
    let mut seen = HashSet::new();
    events
        .into_iter()
        .filter(|event| seen.insert(event.id.clone()))
        .collect()
}

fn uniq_with_eq<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut unique: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique
}

/// Runs the full preparation pipeline for one attendee.
pub fn run_attendee_pipeline(
    window: &PlanningWindow,
    input: AttendeePlanInput<'_>,
) -> AppResult<PipelineOutput> {
    let source = input.source;
    let host_tz = window.host_timezone;
    let days = window.days();

    let mut events: Vec<Event> = input.events.into_iter().chain(input.new_events).collect();

    let breaks = generate_break_events_for_days(
        source,
        &days,
        &events,
        host_tz,
        window.start,
        input.global_calendar_id.as_deref(),
    );
    if !breaks.is_empty() {
        let break_ids: HashSet<&str> = breaks.iter().map(|item| item.id.as_str()).collect();
        events.retain(|event| !break_ids.contains(event.id.as_str()));
        events.extend(breaks.iter().cloned());
    }

    let valid_events: Vec<Event> = events
        .into_iter()
        .filter(|event| match validate_event_dates(event, source, host_tz) {
            Ok(()) => true,
            Err(error) => {
                debug!(target: "app::planner", event_id = %event.id, %error, "event excluded from plan");
                false
            }
        })
        .collect();
    let all_events = uniq_by_id(valid_events);

    let mut parts = Vec::new();
    for event in &all_events {
        match generate_event_parts(event, &window.host_id, window.granularity) {
            Ok(event_parts) => parts.extend(event_parts),
            Err(error) => {
                warn!(target: "app::planner", event_id = %event.id, %error, "could not split event");
            }
        }
    }
    let parts = stitch_post_buffers(stitch_pre_buffers(parts));

    let work_times = source.work_times(&window.host_id, host_tz, window.start.date())?;
    let user = source.user_constraint(&window.host_id, work_times);

    let mut records = Vec::with_capacity(parts.len());
    for part in &parts {
        let host_date = shift_timezone(part.event.start_date, event_timezone(&part.event)?, host_tz)?.date();
        let total_working_hours = source
            .work_window(host_date, host_tz)
            .ok()
            .flatten()
            .map(|work_window| work_window.working_hours);
        let mut record = format_event_part(part, &user, host_tz, total_working_hours)?;
        set_preferred_time_for_unmodifiable_event(&mut record);
        records.push(record);
    }
    let records = tag_events_for_daily_or_weekly_task(records, &input.recurring_parents);

    let timeslots = generate_time_slots_for_days(
        source,
        &days,
        host_tz,
        &window.host_id,
        window.granularity,
        window.start,
    );

    info!(
        target: "app::planner",
        user_id = %source.user_id(),
        kind = ?source.kind(),
        events = all_events.len(),
        breaks = breaks.len(),
        parts = records.len(),
        timeslots = timeslots.len(),
        "attendee pipeline complete"
    );

    Ok(PipelineOutput {
        user_list: vec![user],
        event_parts: records,
        all_events,
        breaks,
        timeslots,
    })
}

/// Concatenates pipeline outputs and drops exact duplicates, keeping first occurrences.
pub fn merge_pipeline_outputs(outputs: Vec<PipelineOutput>) -> PipelineOutput {
    let mut merged = PipelineOutput::default();
    for output in outputs {
        merged.user_list.extend(output.user_list);
        merged.event_parts.extend(output.event_parts);
        merged.all_events.extend(output.all_events);
        merged.breaks.extend(output.breaks);
        merged.timeslots.extend(output.timeslots);
    }

    PipelineOutput {
        user_list: uniq_with_eq(merged.user_list),
        event_parts: uniq_with_eq(merged.event_parts),
        all_events: uniq_with_eq(merged.all_events),
        breaks: uniq_with_eq(merged.breaks),
        timeslots: uniq_with_eq(merged.timeslots),
    }
}

pub fn planner_file_key(host_id: &str, singleton_id: &str) -> String {
    format!("{host_id}/{singleton_id}.json")
}

pub fn replan_file_key(host_id: &str, singleton_id: &str, event_id: &str) -> String {
    format!("{host_id}/{singleton_id}_REPLAN_{event_id}.json")
}

pub fn assemble_planner_request(
    host_id: &str,
    merged: &PipelineOutput,
    delay: u64,
    call_back_url: &str,
    replan_event_id: Option<&str>,
) -> AppResult<PlannerRequest> {
    if merged.event_parts.is_empty() {
        return Err(AppError::validation("没有可排程的事件片段"));
    }
    if merged.timeslots.is_empty() {
        return Err(AppError::validation("没有可用的时间段"));
    }
    if merged.user_list.is_empty() {
        return Err(AppError::validation("没有参与排程的用户"));
    }

    let singleton_id = Uuid::new_v4().to_string();
    let file_key = match replan_event_id {
        Some(event_id) => replan_file_key(host_id, &singleton_id, event_id),
        None => planner_file_key(host_id, &singleton_id),
    };

    Ok(PlannerRequest {
        singleton_id,
        host_id: host_id.to_string(),
        timeslots: merged.timeslots.clone(),
        user_list: merged.user_list.clone(),
        event_parts: merged.event_parts.clone(),
        file_key,
        delay,
        call_back_url: call_back_url.to_string(),
    })
}
