use uuid::Uuid;

use crate::models::event::Reminder;

/// One reminder per entry of `minutes`, attached to `event_id`.
pub fn create_reminders_from_minutes_and_event(
    event_id: &str,
    user_id: &str,
    timezone: Option<&str>,
    minutes: &[i64],
    use_default: bool,
) -> Vec<Reminder> {
    minutes
        .iter()
        .map(|minutes| Reminder {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            event_id: event_id.to_string(),
            timezone: timezone.map(str::to_string),
            minutes: *minutes,
            use_default,
        })
        .collect()
}
