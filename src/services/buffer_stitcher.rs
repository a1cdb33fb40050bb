use std::collections::HashSet;

use tracing::debug;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::event::{BufferPair, BufferTimes, Event, EventMethod, EventPart};
use crate::services::schedule_utils::add_minutes;

const BUFFER_TITLE: &str = "Buffer time";

/// Builds the prep/wrap-up events requested for `event`. Existing buffer ids on
/// the event are reused so re-planning keeps their identity.
pub fn create_buffer_events(event: &Event, times: BufferTimes) -> AppResult<BufferPair> {
    let calendar_id = event.calendar_id.clone().unwrap_or_default();
    let mut new_event = event.clone();

    let before_event = if times.before_event > 0 {
        let (id, provider_id) = buffer_identity(event.pre_event_id.as_deref(), &calendar_id);
        let start = add_minutes(event.start_date, -times.before_event)?;
        let mut buffer = buffer_template(event, id, provider_id, start, event.start_date);
        buffer.duration = Some(times.before_event);
        buffer.is_pre_event = true;
        new_event.pre_event_id = Some(buffer.id.clone());
        Some(buffer)
    } else {
        None
    };

    let after_event = if times.after_event > 0 {
        let (id, provider_id) = buffer_identity(event.post_event_id.as_deref(), &calendar_id);
        let end = add_minutes(event.end_date, times.after_event)?;
        let mut buffer = buffer_template(event, id, provider_id, event.end_date, end);
        buffer.duration = Some(times.after_event);
        buffer.is_post_event = true;
        new_event.post_event_id = Some(buffer.id.clone());
        Some(buffer)
    } else {
        None
    };

    new_event.time_blocking = Some(times);

    Ok(BufferPair {
        new_event,
        before_event,
        after_event,
    })
}

fn buffer_identity(existing: Option<&str>, calendar_id: &str) -> (String, String) {
    match existing {
        Some(id) => (
            id.to_string(),
            id.split('#').next().unwrap_or(id).to_string(),
        ),
        None => {
            let provider_id = Uuid::new_v4().to_string();
            (format!("{provider_id}#{calendar_id}"), provider_id)
        }
    }
}

fn buffer_template(
    event: &Event,
    id: String,
    provider_id: String,
    start: chrono::NaiveDateTime,
    end: chrono::NaiveDateTime,
) -> Event {
    Event {
        id,
        event_id: Some(provider_id),
        user_id: event.user_id.clone(),
        calendar_id: event.calendar_id.clone(),
        title: Some(BUFFER_TITLE.to_string()),
        notes: Some(BUFFER_TITLE.to_string()),
        start_date: start,
        end_date: end,
        timezone: event.timezone.clone(),
        for_event_id: Some(event.id.clone()),
        modifiable: true,
        priority: 1,
        background_color: event.background_color.clone(),
        method: Some(EventMethod::Create),
        ..Event::default()
    }
}

fn renumber(parts: &mut [EventPart], group_id: &str) {
    let last_part = parts.len() as u32;
    for (index, part) in parts.iter_mut().enumerate() {
        part.group_id = group_id.to_string();
        part.part = index as u32 + 1;
        part.last_part = last_part;
    }
}

fn sorted(mut parts: Vec<EventPart>) -> Vec<EventPart> {
    parts.sort_by_key(|part| part.part);
    parts
}

/// Pre-buffer parts followed by the event's own parts, renumbered 1..N in one new group.
pub fn stitch_pre_buffer(parts: &[EventPart], for_event_id: &str) -> Vec<EventPart> {
    let pre_parts = sorted(
        parts
            .iter()
            .filter(|part| part.event.is_pre_event && part.for_event_id() == Some(for_event_id))
            .cloned()
            .collect(),
    );
    let actual_parts = sorted(
        parts
            .iter()
            .filter(|part| part.id() == for_event_id)
            .cloned()
            .collect(),
    );

    let group_id = Uuid::new_v4().to_string();
    let mut combined: Vec<EventPart> = pre_parts.into_iter().chain(actual_parts).collect();
    renumber(&mut combined, &group_id);
    combined
}

/// The event's own parts followed by its post-buffer parts. When the event was
/// already stitched to a pre-buffer, numbering continues from that sequence.
pub fn stitch_post_buffer(parts: &[EventPart], for_event_id: &str) -> Vec<EventPart> {
    let actual_parts = sorted(
        parts
            .iter()
            .filter(|part| part.id() == for_event_id)
            .cloned()
            .collect(),
    );
    let post_parts = sorted(
        parts
            .iter()
            .filter(|part| part.event.is_post_event && part.for_event_id() == Some(for_event_id))
            .cloned()
            .collect(),
    );
    let group_id = Uuid::new_v4().to_string();

    let pre_event_id = actual_parts
        .first()
        .and_then(|part| part.event.pre_event_id.clone());

    let Some(pre_event_id) = pre_event_id else {
        let mut combined: Vec<EventPart> = actual_parts.into_iter().chain(post_parts).collect();
        renumber(&mut combined, &group_id);
        return combined;
    };

    let previous_last_part = actual_parts
        .first()
        .map(|part| part.last_part)
        .unwrap_or_default();
    let last_part = previous_last_part + post_parts.len() as u32;

    let pre_parts = sorted(
        parts
            .iter()
            .filter(|part| part.event_id == pre_event_id)
            .cloned()
            .collect(),
    );

    let mut combined = Vec::with_capacity(pre_parts.len() + actual_parts.len() + post_parts.len());
    for mut part in pre_parts.into_iter().chain(actual_parts) {
        part.group_id = group_id.clone();
        part.last_part = last_part;
        combined.push(part);
    }
    for (index, mut part) in post_parts.into_iter().enumerate() {
        part.group_id = group_id.clone();
        part.part = previous_last_part + index as u32 + 1;
        part.last_part = last_part;
        combined.push(part);
    }
    combined
}

fn unique_for_event_ids(parts: &[EventPart], matches: impl Fn(&EventPart) -> bool) -> Vec<String> {
    let mut seen = HashSet::new();
    parts
        .iter()
        .filter(|part| matches(part))
        .filter_map(|part| part.for_event_id())
        .filter(|id| seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}

fn merge_stitched(parts: Vec<EventPart>, stitched: Vec<EventPart>) -> Vec<EventPart> {
    let stitched_ids: HashSet<String> = stitched.iter().map(|part| part.id().to_string()).collect();
    let mut merged: Vec<EventPart> = parts
        .into_iter()
        .filter(|part| !stitched_ids.contains(part.id()))
        .collect();
    merged.extend(stitched);
    merged
}

pub fn stitch_pre_buffers(parts: Vec<EventPart>) -> Vec<EventPart> {
    let for_event_ids = unique_for_event_ids(&parts, |part| part.event.is_pre_event);
    if for_event_ids.is_empty() {
        return parts;
    }
    debug!(target: "app::planner", count = for_event_ids.len(), "stitching pre-buffer parts");

    let stitched: Vec<EventPart> = for_event_ids
        .iter()
        .flat_map(|id| stitch_pre_buffer(&parts, id))
        .collect();
    merge_stitched(parts, stitched)
}

pub fn stitch_post_buffers(parts: Vec<EventPart>) -> Vec<EventPart> {
    let for_event_ids = unique_for_event_ids(&parts, |part| part.event.is_post_event);
    if for_event_ids.is_empty() {
        return parts;
    }
    debug!(target: "app::planner", count = for_event_ids.len(), "stitching post-buffer parts");

    let stitched: Vec<EventPart> = for_event_ids
        .iter()
        .flat_map(|id| stitch_post_buffer(&parts, id))
        .collect();
    merge_stitched(parts, stitched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::timeslot::Granularity;
    use crate::services::event_parts::generate_event_parts;
    use chrono::{NaiveDate, NaiveDateTime};

    fn dt(h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 5, 5)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    fn parts_for(events: &[&Event]) -> AppResult<Vec<EventPart>> {
        let mut parts = Vec::new();
        for event in events {
            parts.extend(generate_event_parts(event, "host", Granularity::Full)?);
        }
        Ok(parts)
    }

    fn buffered_meeting(before: i64, after: i64) -> AppResult<BufferPair> {
        let mut meeting = Event::new("m1#cal", "u1", dt(10, 0), dt(10, 45), "UTC");
        meeting.calendar_id = Some("cal".into());
        create_buffer_events(
            &meeting,
            BufferTimes {
                before_event: before,
                after_event: after,
            },
        )
    }

    #[test]
    fn buffer_events_wrap_the_meeting() -> AppResult<()> {
        let pair = buffered_meeting(30, 15)?;
        let before = pair.before_event.as_ref().expect("before");
        let after = pair.after_event.as_ref().expect("after");

        assert_eq!((before.start_date, before.end_date), (dt(9, 30), dt(10, 0)));
        assert_eq!((after.start_date, after.end_date), (dt(10, 45), dt(11, 0)));
        assert!(before.is_pre_event && after.is_post_event);
        assert_eq!(before.for_event_id.as_deref(), Some("m1#cal"));
        assert!(before.id.ends_with("#cal"));
        assert_eq!(pair.new_event.pre_event_id.as_deref(), Some(before.id.as_str()));
        assert_eq!(pair.new_event.post_event_id.as_deref(), Some(after.id.as_str()));
        assert_eq!(pair.new_event.time_blocking.map(|t| t.before_event), Some(30));
        Ok(())
    }

    #[test]
    fn existing_buffer_ids_are_reused() -> AppResult<()> {
        let mut meeting = Event::new("m1#cal", "u1", dt(10, 0), dt(10, 45), "UTC");
        meeting.pre_event_id = Some("pre-1#cal".into());
        let pair = create_buffer_events(
            &meeting,
            BufferTimes {
                before_event: 15,
                after_event: 0,
            },
        )?;
        let before = pair.before_event.expect("before");
        assert_eq!(before.id, "pre-1#cal");
        assert_eq!(before.event_id.as_deref(), Some("pre-1"));
        assert!(pair.after_event.is_none());
        Ok(())
    }

    #[test]
    fn pre_stitch_puts_buffer_first_and_renumbers() -> AppResult<()> {
        let pair = buffered_meeting(30, 0)?;
        let before = pair.before_event.clone().expect("before");
        let parts = parts_for(&[&before, &pair.new_event])?;

        let stitched = stitch_pre_buffers(parts);
        assert_eq!(stitched.len(), 5);
        assert_eq!(
            stitched.iter().map(|p| p.part).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        assert!(stitched.iter().all(|p| p.last_part == 5));
        assert!(stitched[..2].iter().all(|p| p.event.is_pre_event));
        let group = &stitched[0].group_id;
        assert!(stitched.iter().all(|p| &p.group_id == group));
        Ok(())
    }

    #[test]
    fn pre_and_post_stitch_form_one_unbroken_sequence() -> AppResult<()> {
        let pair = buffered_meeting(30, 15)?;
        let before = pair.before_event.clone().expect("before");
        let after = pair.after_event.clone().expect("after");
        let unrelated = Event::new("other", "u1", dt(13, 0), dt(13, 30), "UTC");
        let parts = parts_for(&[&unrelated, &before, &pair.new_event, &after])?;

        let stitched = stitch_post_buffers(stitch_pre_buffers(parts));
        let mut group: Vec<&EventPart> = stitched
            .iter()
            .filter(|p| p.id() != "other")
            .collect();
        group.sort_by_key(|p| p.part);

        // 2 pre + 3 actual + 1 post
        assert_eq!(group.len(), 6);
        assert_eq!(group.iter().map(|p| p.part).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6]);
        assert!(group.iter().all(|p| p.last_part == 6));
        assert!(group.iter().all(|p| p.group_id == group[0].group_id));
        assert!(group[5].event.is_post_event);

        let untouched: Vec<&EventPart> = stitched.iter().filter(|p| p.id() == "other").collect();
        assert_eq!(untouched.len(), 2);
        assert!(untouched.iter().all(|p| p.group_id == "other"));
        Ok(())
    }

    #[test]
    fn post_only_stitch_starts_at_one() -> AppResult<()> {
        let pair = buffered_meeting(0, 30)?;
        let after = pair.after_event.clone().expect("after");
        let parts = parts_for(&[&pair.new_event, &after])?;

        let stitched = stitch_post_buffers(parts);
        assert_eq!(stitched.iter().map(|p| p.part).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        assert!(stitched[..3].iter().all(|p| !p.event.is_post_event));
        Ok(())
    }
}
