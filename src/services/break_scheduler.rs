use chrono::{NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::event::{Event, EventMethod};
use crate::models::preference::{WorkPreference, MIN_BREAK_MINUTES};
use crate::services::schedule_utils::{
    add_minutes, duration_minutes, event_timezone, overlaps, shift_timezone,
};
use crate::services::work_window::{PreferenceSource, WorkWindow};

const BREAK_TITLE: &str = "Break";
const MAX_BREAK_HOURS_PER_DAY: f64 = 6.0;

/// An event re-expressed in the host timezone.
#[derive(Debug, Clone, Copy, PartialEq)]
struct HostInterval {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

fn host_interval(event: &Event, host_tz: Tz) -> Option<HostInterval> {
    let tz = event_timezone(event).ok()?;
    let start = shift_timezone(event.start_date, tz, host_tz).ok()?;
    let end = shift_timezone(event.end_date, tz, host_tz).ok()?;
    (end > start).then_some(HostInterval { start, end })
}

fn event_hours(event: &Event) -> f64 {
    event_timezone(event)
        .and_then(|tz| duration_minutes(event.start_date, event.end_date, tz))
        .map(|minutes| minutes.max(0) as f64 / 60.0)
        .unwrap_or_default()
}

fn hours_used(events: &[Event], breaks: bool) -> f64 {
    events
        .iter()
        .filter(|event| event.is_break == breaks)
        .map(event_hours)
        .sum()
}

fn break_minutes(preference: &WorkPreference) -> i64 {
    preference.break_length.max(MIN_BREAK_MINUTES)
}

/// Whether the day still has room for breaks under the user's break policy.
pub fn should_generate_break_events_for_day(
    working_hours: f64,
    preference: &WorkPreference,
    events: &[Event],
) -> bool {
    if preference.break_length <= 0 || events.is_empty() {
        return false;
    }

    let break_hours_available =
        (preference.break_length as f64 / 60.0) * preference.min_number_of_breaks as f64;
    let break_hours_used = hours_used(events, true);
    if break_hours_used >= break_hours_available {
        return false;
    }

    hours_used(events, false) < working_hours
}

/// Number of breaks to add for a day, or `None` when the budget leaves no room.
pub fn number_of_breaks_to_generate(
    working_hours: f64,
    preference: &WorkPreference,
    events: &[Event],
) -> Option<u32> {
    if !should_generate_break_events_for_day(working_hours, preference, events) {
        return None;
    }

    let mut hours_available = working_hours - hours_used(events, false);
    let hours_must_be_break =
        working_hours * (1.0 - preference.max_work_load_percent as f64 / 100.0);
    if hours_available < hours_must_be_break {
        hours_available = hours_must_be_break;
    }
    if hours_available <= 0.0 {
        return None;
    }

    let min_break_hours =
        (preference.break_length as f64 / 60.0) * preference.min_number_of_breaks as f64;
    let break_hours_to_generate = min_break_hours.min(hours_available);
    if break_hours_to_generate > MAX_BREAK_HOURS_PER_DAY {
        return None;
    }

    let actual_break_hours = break_hours_to_generate - hours_used(events, true);
    if actual_break_hours > hours_available {
        return None;
    }

    let count = (actual_break_hours / (break_minutes(preference) as f64 / 60.0)).floor();
    if count < 1.0 {
        return None;
    }
    Some(count as u32)
}

/// Unplaced break events modelled on `template`; they all start at `anchor`.
pub fn generate_break_events(
    preference: &WorkPreference,
    template: &Event,
    count: u32,
    anchor: NaiveDateTime,
    global_calendar_id: Option<&str>,
) -> AppResult<Vec<Event>> {
    let length = break_minutes(preference);
    let calendar_id = global_calendar_id
        .map(str::to_string)
        .or_else(|| template.calendar_id.clone());
    let end = add_minutes(anchor, length)?;

    Ok((0..count)
        .map(|_| {
            let provider_id = Uuid::new_v4().to_string();
            Event {
                id: format!("{provider_id}#{}", calendar_id.clone().unwrap_or_default()),
                event_id: Some(provider_id),
                user_id: template.user_id.clone(),
                calendar_id: calendar_id.clone(),
                title: Some(BREAK_TITLE.to_string()),
                notes: Some(BREAK_TITLE.to_string()),
                start_date: anchor,
                end_date: end,
                timezone: template.timezone.clone(),
                duration: Some(length),
                is_break: true,
                modifiable: true,
                priority: 1,
                background_color: Some(preference.break_color_or_default()),
                method: Some(EventMethod::Create),
                ..Event::default()
            }
        })
        .collect())
}

/// Greedy first-fit placement. Each break tries to end at an anchor's start, then
/// to start at its end; anchors are the day's non-break events in order, followed
/// by breaks already placed. Returned breaks carry host-timezone times.
pub fn adjust_start_dates_for_break_events_for_day(
    events: &[Event],
    breaks: Vec<Event>,
    day_start: NaiveDateTime,
    day_end: NaiveDateTime,
    host_tz: Tz,
) -> Vec<Event> {
    let occupied: Vec<HostInterval> = events
        .iter()
        .filter_map(|event| host_interval(event, host_tz))
        .collect();
    let anchors: Vec<HostInterval> = events
        .iter()
        .filter(|event| !event.is_break)
        .filter_map(|event| host_interval(event, host_tz))
        .collect();

    let mut placed: Vec<HostInterval> = Vec::new();
    let mut placed_breaks = Vec::new();

    for mut candidate_break in breaks {
        let length = chrono::Duration::minutes(
            candidate_break
                .duration
                .unwrap_or_else(|| (candidate_break.end_date - candidate_break.start_date).num_minutes()),
        );

        let fits = |candidate: &HostInterval, placed: &[HostInterval]| {
            candidate.start >= day_start
                && candidate.end <= day_end
                && occupied
                    .iter()
                    .chain(placed.iter())
                    .all(|other| !overlaps(candidate.start, candidate.end, other.start, other.end))
        };

        let mut chosen = None;
        let anchor_list: Vec<HostInterval> = anchors.iter().chain(placed.iter()).copied().collect();
        for anchor in anchor_list {
            let before = HostInterval {
                start: anchor.start - length,
                end: anchor.start,
            };
            if fits(&before, &placed) {
                chosen = Some(before);
                break;
            }
            let after = HostInterval {
                start: anchor.end,
                end: anchor.end + length,
            };
            if fits(&after, &placed) {
                chosen = Some(after);
                break;
            }
        }

        match chosen {
            Some(slot) => {
                candidate_break.start_date = slot.start;
                candidate_break.end_date = slot.end;
                placed.push(slot);
                placed_breaks.push(candidate_break);
            }
            None => {
                debug!(target: "app::breaks", break_id = %candidate_break.id, "no gap fits break");
            }
        }
    }

    placed_breaks
}

/// Breaks for one day of `preference`'s owner, already placed and expressed in the
/// template event's timezone. `events` are the owner's events for that day.
pub fn generate_break_events_for_day(
    preference: &WorkPreference,
    window: &WorkWindow,
    events: &[Event],
    host_tz: Tz,
    first_day_now: Option<NaiveDateTime>,
    global_calendar_id: Option<&str>,
) -> AppResult<Vec<Event>> {
    let mut day_start = window.start_at();
    let day_end = window.end_at();
    if let Some(now) = first_day_now {
        if now >= day_end {
            return Ok(Vec::new());
        }
        if now > day_start {
            day_start = now;
        }
    }

    let day_events: Vec<Event> = events
        .iter()
        .filter(|event| !event.all_day)
        .filter(|event| {
            host_interval(event, host_tz)
                .map(|interval| overlaps(interval.start, interval.end, day_start, day_end))
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    let Some(count) = number_of_breaks_to_generate(window.working_hours, preference, &day_events)
    else {
        return Ok(Vec::new());
    };
    let Some(template) = day_events.iter().find(|event| !event.is_break) else {
        return Ok(Vec::new());
    };

    let unplaced = generate_break_events(preference, template, count, day_start, global_calendar_id)?;
    let placed =
        adjust_start_dates_for_break_events_for_day(&day_events, unplaced, day_start, day_end, host_tz);

    let template_tz = event_timezone(template)?;
    let mut breaks = Vec::with_capacity(placed.len());
    for mut item in placed {
        item.start_date = shift_timezone(item.start_date, host_tz, template_tz)?;
        item.end_date = shift_timezone(item.end_date, host_tz, template_tz)?;
        breaks.push(item);
    }

    info!(
        target: "app::breaks",
        user_id = %preference.user_id,
        date = %window.date,
        requested = count,
        placed = breaks.len(),
        "break events generated"
    );
    Ok(breaks)
}

/// Breaks across every day of a planning window, processed in day order.
pub fn generate_break_events_for_days(
    source: &dyn PreferenceSource,
    days: &[NaiveDate],
    events: &[Event],
    host_tz: Tz,
    now: NaiveDateTime,
    global_calendar_id: Option<&str>,
) -> Vec<Event> {
    let Some(preference) = source.preference() else {
        return Vec::new();
    };

    let mut breaks: Vec<Event> = Vec::new();
    for (index, day) in days.iter().enumerate() {
        let window = match source.work_window(*day, host_tz) {
            Ok(Some(window)) => window,
            Ok(None) => continue,
            Err(error) => {
                warn!(target: "app::breaks", user_id = %source.user_id(), date = %day, %error, "skipping breaks for day");
                continue;
            }
        };
        let first_day_now = if index == 0 { Some(now) } else { None };
        let known: Vec<Event> = events.iter().chain(breaks.iter()).cloned().collect();
        match generate_break_events_for_day(
            preference,
            &window,
            &known,
            host_tz,
            first_day_now,
            global_calendar_id,
        ) {
            Ok(day_breaks) => breaks.extend(day_breaks),
            Err(error) => {
                warn!(target: "app::breaks", user_id = %source.user_id(), date = %day, %error, "break generation failed");
            }
        }
    }
    breaks
}
