use std::collections::{HashMap, HashSet};

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::event::{Event, EventMethod};
use crate::models::planner::{AssignedTimeslot, PlannerResponsePart, PlannerRunSnapshot};
use crate::models::timeslot::Granularity;
use crate::services::schedule_utils::{
    add_minutes, duration_minutes, event_timezone, parse_timezone, shift_timezone,
};

pub const DEFAULT_TOLERANCE_MINUTES: i64 = 0;

/// Calendar date a slot was assigned to. Slots without a month/day stay on `fallback`.
///
/// A month/day carries no year, so the occurrence nearest `fallback` wins. This keeps
/// windows that cross New Year on the right side of it.
pub fn get_month_day_from_slot(slot: &AssignedTimeslot, fallback: NaiveDate) -> NaiveDate {
    let Some(month_day) = slot.month_day else {
        return fallback;
    };
    [fallback.year() - 1, fallback.year(), fallback.year() + 1]
        .into_iter()
        .filter_map(|year| month_day.with_year(year))
        .min_by_key(|date| (*date - fallback).num_days().abs())
        .unwrap_or(fallback)
}

fn sorted_parts(parts: &[PlannerResponsePart]) -> Vec<PlannerResponsePart> {
    let mut parts = parts.to_vec();
    parts.sort_by_key(|part| part.part);
    parts
}

fn slot_span(
    parts: &[PlannerResponsePart],
    fallback: NaiveDate,
) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let first = parts.first()?;
    let last = parts.last()?;
    let start = get_month_day_from_slot(&first.timeslot, fallback).and_time(first.timeslot.start_time);
    let end = get_month_day_from_slot(&last.timeslot, fallback).and_time(last.timeslot.end_time);
    Some((start, end))
}

/// Rejects assignments whose slot span differs from the quanta the parts cover.
/// For an event that was not stitched to a buffer the parts run `1..=lastPart`,
/// so the expected span is `lastPart` quanta.
pub fn validate_events_from_planner(
    parts: &[PlannerResponsePart],
    granularity: Granularity,
    fallback: NaiveDate,
    tolerance_minutes: i64,
) -> AppResult<()> {
    let parts = sorted_parts(parts);
    let Some((start, end)) = slot_span(&parts, fallback) else {
        return Err(AppError::validation("求解结果为空"));
    };
    let (Some(first), Some(last)) = (parts.first(), parts.last()) else {
        return Err(AppError::validation("求解结果为空"));
    };

    let actual_minutes = (end - start).num_minutes();
    let covered_parts = i64::from(last.part) - i64::from(first.part) + 1;
    let expected_minutes = covered_parts * i64::from(granularity.minutes());
    if (actual_minutes - expected_minutes).abs() > tolerance_minutes {
        return Err(AppError::duration_mismatch(
            last.event_id.clone(),
            expected_minutes,
            actual_minutes,
        ));
    }
    Ok(())
}

/// Moves `old_event` to the assigned slots. Slot times are host wall-clock values;
/// the result is expressed in the event's own timezone.
///
/// The new end is `start + original duration`, not the last slot's end. A trailing
/// remainder part occupies a whole slot, so the slot end would stretch the event.
pub fn format_planner_events_to_event_and_adjust_time(
    parts: &[PlannerResponsePart],
    old_event: &Event,
    host_tz: Tz,
) -> AppResult<Event> {
    let tz = event_timezone(old_event)?;
    let duration = duration_minutes(old_event.start_date, old_event.end_date, tz)?;
    if duration <= 0 {
        return Err(AppError::validation_with_details(
            "原事件时间无效",
            json!({"eventId": old_event.id, "minutes": duration}),
        ));
    }

    let parts = sorted_parts(parts);
    let host_date = shift_timezone(old_event.start_date, tz, host_tz)?.date();
    let Some((host_start, _)) = slot_span(&parts, host_date) else {
        return Err(AppError::validation("求解结果为空"));
    };

    let start_date = shift_timezone(host_start, host_tz, tz)?;
    let end_date = add_minutes(start_date, duration)?;
    if end_date <= start_date {
        return Err(AppError::validation_with_details(
            "调整后的事件时间无效",
            json!({"eventId": old_event.id}),
        ));
    }

    let mut event = old_event.clone();
    event.start_date = start_date;
    event.end_date = end_date;
    event.duration = Some(duration);
    Ok(event)
}

#[derive(Debug)]
pub struct ReconcileFailure {
    pub event_id: String,
    pub error: AppError,
}

#[derive(Debug, Default)]
pub struct ReconciledPlan {
    /// Moved events plus newly created breaks and buffers, ready to persist.
    pub events: Vec<Event>,
    /// Ids of events the solver left where they were.
    pub unchanged: Vec<String>,
    pub failures: Vec<ReconcileFailure>,
}

/// Ordinals the request sent for each event id.
fn requested_ordinals(snapshot: &PlannerRunSnapshot) -> HashMap<&str, Vec<u32>> {
    let mut ordinals: HashMap<&str, Vec<u32>> = HashMap::new();
    for record in &snapshot.request.event_parts {
        ordinals.entry(record.event_id.as_str()).or_default().push(record.part);
    }
    for values in ordinals.values_mut() {
        values.sort_unstable();
        values.dedup();
    }
    ordinals
}

/// Every requested part must come back exactly once.
fn check_completeness(
    event_id: &str,
    group: &[PlannerResponsePart],
    requested: Option<&Vec<u32>>,
    granularity: Granularity,
) -> AppResult<()> {
    let Some(requested) = requested else {
        return Ok(());
    };
    let mut returned: Vec<u32> = group.iter().map(|part| part.part).collect();
    returned.sort_unstable();
    if returned == *requested {
        return Ok(());
    }
    let quantum = i64::from(granularity.minutes());
    Err(AppError::duration_mismatch(
        event_id,
        requested.len() as i64 * quantum,
        returned.len() as i64 * quantum,
    ))
}

fn created_ids(snapshot: &PlannerRunSnapshot) -> HashSet<String> {
    let mut ids: HashSet<String> = snapshot.breaks.iter().map(|item| item.id.clone()).collect();
    for pair in &snapshot.new_buffer_pairs {
        ids.extend(pair.before_event.iter().map(|item| item.id.clone()));
        ids.extend(pair.after_event.iter().map(|item| item.id.clone()));
    }
    ids
}

/// Applies solver assignments to the events captured in `snapshot`.
pub fn reconcile_plan(
    responses: &[Vec<PlannerResponsePart>],
    snapshot: &PlannerRunSnapshot,
    tolerance_minutes: i64,
) -> AppResult<ReconciledPlan> {
    let host_tz = parse_timezone(&snapshot.host_timezone)?;
    let events_by_id: HashMap<&str, &Event> = snapshot
        .all_events
        .iter()
        .map(|event| (event.id.as_str(), event))
        .collect();
    let created = created_ids(snapshot);
    let requested = requested_ordinals(snapshot);

    let mut plan = ReconciledPlan::default();
    for group in responses {
        let Some(first) = group.first() else {
            continue;
        };
        let event_id = first.event_id.clone();
        let Some(old_event) = events_by_id.get(event_id.as_str()).copied() else {
            warn!(target: "app::reconcile", %event_id, "assignment for unknown event");
            plan.failures.push(ReconcileFailure {
                event_id,
                error: AppError::not_found(),
            });
            continue;
        };

        let outcome = check_completeness(
            &event_id,
            group,
            requested.get(event_id.as_str()),
            snapshot.granularity,
        )
        .and_then(|()| event_timezone(old_event))
        .and_then(|tz| shift_timezone(old_event.start_date, tz, host_tz))
        .and_then(|host_start| {
            validate_events_from_planner(
                group,
                snapshot.granularity,
                host_start.date(),
                tolerance_minutes,
            )
        })
        .and_then(|()| format_planner_events_to_event_and_adjust_time(group, old_event, host_tz));

        let mut event = match outcome {
            Ok(event) => event,
            Err(error) => {
                plan.failures.push(ReconcileFailure { event_id, error });
                continue;
            }
        };

        if created.contains(&event.id) || old_event.method == Some(EventMethod::Create) {
            event.method = Some(EventMethod::Create);
            plan.events.push(event);
        } else if !old_event.modifiable {
            debug!(target: "app::reconcile", %event_id, "unmodifiable event left in place");
            plan.unchanged.push(event_id);
        } else if event.start_date != old_event.start_date || event.end_date != old_event.end_date {
            event.method = Some(EventMethod::Update);
            plan.events.push(event);
        } else {
            plan.unchanged.push(event_id);
        }
    }

    info!(
        target: "app::reconcile",
        singleton_id = %snapshot.singleton_id,
        persisted = plan.events.len(),
        unchanged = plan.unchanged.len(),
        failed = plan.failures.len(),
        "plan reconciled"
    );
    Ok(plan)
}
