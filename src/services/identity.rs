use std::collections::HashMap;

use tracing::debug;

use crate::models::event::{Attendee, BufferPair, Event, PreferredTimeRange, Reminder};

/// Placeholder-to-real id mapping for events created during a run.
///
/// Full ids have the shape `{providerId}#{calendarId}`. Recording one created
/// event also covers every sibling copy that shares its provider id, so an
/// attendee's `{placeholder}#{theirCalendar}` resolves without its own entry.
#[derive(Debug, Default, Clone)]
pub struct IdentityTable {
    full_ids: HashMap<String, String>,
    provider_ids: HashMap<String, String>,
}

fn split_full_id(id: &str) -> (&str, Option<&str>) {
    match id.split_once('#') {
        Some((provider, calendar)) => (provider, Some(calendar)),
        None => (id, None),
    }
}

impl IdentityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.provider_ids.is_empty() && self.full_ids.is_empty()
    }

    /// Records that `placeholder_id` was created upstream as `real_provider_id`.
    /// Returns the event's new full id.
    pub fn record_created(&mut self, placeholder_id: &str, real_provider_id: &str) -> String {
        let (placeholder_provider, calendar) = split_full_id(placeholder_id);
        let real_full = match calendar {
            Some(calendar) => format!("{real_provider_id}#{calendar}"),
            None => real_provider_id.to_string(),
        };
        self.provider_ids
            .insert(placeholder_provider.to_string(), real_provider_id.to_string());
        self.full_ids
            .insert(placeholder_id.to_string(), real_full.clone());
        debug!(
            target: "app::planner",
            placeholder = %placeholder_id,
            real = %real_full,
            "recorded created event id"
        );
        real_full
    }

    /// Current id for `id`, which may be a full id or a bare provider id.
    pub fn resolve(&self, id: &str) -> String {
        if let Some(real) = self.full_ids.get(id) {
            return real.clone();
        }
        let (provider, calendar) = split_full_id(id);
        match (self.provider_ids.get(provider), calendar) {
            (Some(real), Some(calendar)) => format!("{real}#{calendar}"),
            (Some(real), None) => real.clone(),
            (None, _) => id.to_string(),
        }
    }

    fn resolve_in_place(&self, id: &mut String) {
        let resolved = self.resolve(id);
        if resolved != *id {
            *id = resolved;
        }
    }

    fn resolve_option(&self, id: &mut Option<String>) {
        if let Some(value) = id.as_mut() {
            self.resolve_in_place(value);
        }
    }

    pub fn apply_to_event(&self, event: &mut Event) {
        let resolved = self.resolve(&event.id);
        if resolved != event.id {
            event.event_id = Some(split_full_id(&resolved).0.to_string());
            event.id = resolved;
        } else {
            self.resolve_option(&mut event.event_id);
        }
        self.resolve_option(&mut event.pre_event_id);
        self.resolve_option(&mut event.post_event_id);
        self.resolve_option(&mut event.for_event_id);
        for range in &mut event.preferred_time_ranges {
            self.resolve_in_place(&mut range.event_id);
        }
    }

    pub fn apply_to_events(&self, events: &mut [Event]) {
        for event in events {
            self.apply_to_event(event);
        }
    }

    pub fn apply_to_buffer_pairs(&self, pairs: &mut [BufferPair]) {
        for pair in pairs {
            self.apply_to_event(&mut pair.new_event);
            if let Some(before) = pair.before_event.as_mut() {
                self.apply_to_event(before);
            }
            if let Some(after) = pair.after_event.as_mut() {
                self.apply_to_event(after);
            }
        }
    }

    pub fn apply_to_reminders(&self, reminders: &mut [Reminder]) {
        for reminder in reminders {
            self.resolve_in_place(&mut reminder.event_id);
        }
    }

    pub fn apply_to_preferred_time_ranges(&self, ranges: &mut [PreferredTimeRange]) {
        for range in ranges {
            self.resolve_in_place(&mut range.event_id);
        }
    }

    pub fn apply_to_attendees(&self, attendees: &mut [Attendee]) {
        for attendee in attendees {
            self.resolve_in_place(&mut attendee.event_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn event(id: &str) -> Event {
        let day = NaiveDate::from_ymd_opt(2025, 5, 5).unwrap();
        let mut event = Event::new(
            id,
            "u1",
            day.and_hms_opt(10, 0, 0).unwrap(),
            day.and_hms_opt(11, 0, 0).unwrap(),
            "UTC",
        );
        event.event_id = Some(id.split('#').next().unwrap().to_string());
        event
    }

    #[test]
    fn resolves_full_and_provider_ids_and_sibling_copies() {
        let mut table = IdentityTable::new();
        assert!(table.is_empty());
        let real = table.record_created("tmp-1#host-cal", "g-abc");

        assert_eq!(real, "g-abc#host-cal");
        assert_eq!(table.resolve("tmp-1#host-cal"), "g-abc#host-cal");
        assert_eq!(table.resolve("tmp-1"), "g-abc");
        assert_eq!(table.resolve("tmp-1#guest-cal"), "g-abc#guest-cal");
        assert_eq!(table.resolve("other#host-cal"), "other#host-cal");
    }

    #[test]
    fn rewrites_every_dependent_reference() {
        let mut table = IdentityTable::new();
        table.record_created("meet#cal", "real-meet");
        table.record_created("pre#cal", "real-pre");

        let mut meeting = event("meet#cal");
        meeting.pre_event_id = Some("pre#cal".into());
        let mut pre = event("pre#cal");
        pre.for_event_id = Some("meet#cal".into());
        let mut pairs = vec![BufferPair {
            new_event: meeting,
            before_event: Some(pre),
            after_event: None,
        }];
        table.apply_to_buffer_pairs(&mut pairs);

        assert_eq!(pairs[0].new_event.id, "real-meet#cal");
        assert_eq!(pairs[0].new_event.event_id.as_deref(), Some("real-meet"));
        assert_eq!(pairs[0].new_event.pre_event_id.as_deref(), Some("real-pre#cal"));
        let pre = pairs[0].before_event.as_ref().unwrap();
        assert_eq!(pre.id, "real-pre#cal");
        assert_eq!(pre.for_event_id.as_deref(), Some("real-meet#cal"));

        let mut reminders = vec![Reminder {
            id: "r1".into(),
            user_id: "u1".into(),
            event_id: "meet#cal".into(),
            timezone: None,
            minutes: 10,
            use_default: false,
        }];
        table.apply_to_reminders(&mut reminders);
        assert_eq!(reminders[0].event_id, "real-meet#cal");

        let mut attendees = vec![Attendee {
            id: "a1".into(),
            event_id: "meet#guest".into(),
            user_id: Some("guest".into()),
            name: None,
            email: Some("guest@example.com".into()),
            is_external: true,
        }];
        table.apply_to_attendees(&mut attendees);
        assert_eq!(attendees[0].event_id, "real-meet#guest");

        let mut sibling = vec![event("meet#guest")];
        table.apply_to_events(&mut sibling);
        assert_eq!(sibling[0].id, "real-meet#guest");
    }
}
