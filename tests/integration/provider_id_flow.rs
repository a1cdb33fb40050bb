mod support;

use meeting_planner_lib::db::store::{EventRewrite, PlannerStore};
use meeting_planner_lib::db::DbPool;
use meeting_planner_lib::error::AppError;
use meeting_planner_lib::models::event::{Attendee, Event, Reminder};
use support::{at, harness, Harness, GUEST_TZ, HOST_TZ};

fn event(id: &str, user_id: &str, hour: u32) -> Event {
    let mut event = Event::new(id, user_id, at(5, hour, 0), at(5, hour + 1, 0), HOST_TZ);
    event.calendar_id = id.split_once('#').map(|(_, calendar)| calendar.to_string());
    event
}

fn reminder(id: &str, event_id: &str) -> Reminder {
    Reminder {
        id: id.to_string(),
        user_id: "guest".to_string(),
        event_id: event_id.to_string(),
        timezone: Some(GUEST_TZ.to_string()),
        minutes: 10,
        use_default: false,
    }
}

fn attendee(id: &str, event_id: &str) -> Attendee {
    Attendee {
        id: id.to_string(),
        event_id: event_id.to_string(),
        user_id: Some("guest".to_string()),
        name: Some("Guest".to_string()),
        email: Some("guest@example.com".to_string()),
        is_external: false,
    }
}

/// Meeting with a prep buffer, a wrap-up buffer and the guest's copy on `gcal`.
async fn stored_meeting(harness: &Harness) {
    let mut meeting = event("meet#cal", "host", 10);
    meeting.pre_event_id = Some("pre#cal".to_string());
    meeting.post_event_id = Some("post#cal".to_string());
    let mut pre = event("pre#cal", "host", 9);
    pre.is_pre_event = true;
    pre.for_event_id = Some("meet#cal".to_string());
    let mut post = event("post#cal", "host", 11);
    post.is_post_event = true;
    post.for_event_id = Some("meet#cal".to_string());
    let sibling = event("meet#gcal", "guest", 10);
    harness
        .store
        .upsert_events(&[meeting, pre, post, sibling])
        .await
        .expect("store meeting");
    harness
        .store
        .upsert_reminders(&[reminder("rem-guest", "meet#gcal")])
        .await
        .expect("store reminder");
    harness
        .store
        .upsert_attendees(&[attendee("att-guest", "meet#gcal")])
        .await
        .expect("store attendee");
}

async fn one(harness: &Harness, id: &str) -> Event {
    let mut events = harness
        .store
        .list_events_by_ids(&[id.to_string()])
        .await
        .expect("list events");
    assert_eq!(events.len(), 1, "expected exactly one {id}");
    events.remove(0)
}

#[tokio::test]
async fn created_pre_buffer_updates_meeting_link() {
    let harness = harness();
    stored_meeting(&harness).await;

    harness
        .service
        .apply_provider_ids(&[("pre#cal".to_string(), "real-pre".to_string())])
        .await
        .expect("apply ids");

    let meeting = one(&harness, "meet#cal").await;
    assert_eq!(meeting.pre_event_id.as_deref(), Some("real-pre#cal"));
    assert_eq!(meeting.post_event_id.as_deref(), Some("post#cal"));
    let pre = one(&harness, "real-pre#cal").await;
    assert_eq!(pre.for_event_id.as_deref(), Some("meet#cal"));
}

#[tokio::test]
async fn created_post_buffer_updates_meeting_link() {
    let harness = harness();
    stored_meeting(&harness).await;

    harness
        .service
        .apply_provider_ids(&[("post#cal".to_string(), "real-post".to_string())])
        .await
        .expect("apply ids");

    let meeting = one(&harness, "meet#cal").await;
    assert_eq!(meeting.post_event_id.as_deref(), Some("real-post#cal"));
    assert!(harness
        .store
        .list_events_by_ids(&["post#cal".to_string()])
        .await
        .expect("old post")
        .is_empty());
}

#[tokio::test]
async fn created_meeting_updates_buffers_pointing_at_it() {
    let harness = harness();
    stored_meeting(&harness).await;

    harness
        .service
        .apply_provider_ids(&[("meet#cal".to_string(), "real-meet".to_string())])
        .await
        .expect("apply ids");

    let pre = one(&harness, "pre#cal").await;
    assert_eq!(pre.for_event_id.as_deref(), Some("real-meet#cal"));
    let post = one(&harness, "post#cal").await;
    assert_eq!(post.for_event_id.as_deref(), Some("real-meet#cal"));
    let meeting = one(&harness, "real-meet#cal").await;
    assert_eq!(meeting.event_id.as_deref(), Some("real-meet"));
    assert_eq!(meeting.pre_event_id.as_deref(), Some("pre#cal"));
}

#[tokio::test]
async fn created_meeting_renames_sibling_copy_and_its_rows() {
    let harness = harness();
    stored_meeting(&harness).await;

    harness
        .service
        .apply_provider_ids(&[("meet#cal".to_string(), "real-meet".to_string())])
        .await
        .expect("apply ids");

    assert!(harness
        .store
        .list_events_by_ids(&["meet#gcal".to_string()])
        .await
        .expect("old sibling")
        .is_empty());
    let sibling = one(&harness, "real-meet#gcal").await;
    assert_eq!(sibling.user_id, "guest");
    assert_eq!(sibling.event_id.as_deref(), Some("real-meet"));

    let reminders = harness
        .store
        .list_reminders_for_event("real-meet#gcal")
        .await
        .expect("reminders");
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].id, "rem-guest");
    let attendees = harness
        .store
        .list_attendees_for_event("real-meet#gcal")
        .await
        .expect("attendees");
    assert_eq!(attendees.len(), 1);
    assert!(harness
        .store
        .list_attendees_for_event("meet#gcal")
        .await
        .expect("old attendees")
        .is_empty());
}

#[tokio::test]
async fn failed_rewrite_leaves_placeholders_in_place() {
    let harness = harness();
    stored_meeting(&harness).await;

    let pool = DbPool::new(harness.dir.path().join("planner.sqlite")).expect("pool");
    pool.with_connection(|conn| {
        conn.execute_batch(
            "CREATE TRIGGER reject_attendee BEFORE INSERT ON attendees
             WHEN NEW.id = 'att-bad'
             BEGIN SELECT RAISE(ABORT, 'attendee rejected'); END;",
        )?;
        Ok(())
    })
    .expect("install trigger");

    let mut renamed = event("real-meet#cal", "host", 10);
    renamed.event_id = Some("real-meet".to_string());
    let rewrite = EventRewrite {
        removed_ids: vec!["meet#cal".to_string()],
        events: vec![renamed],
        attendees: vec![attendee("att-bad", "real-meet#cal")],
        ..EventRewrite::default()
    };
    let error = harness
        .store
        .apply_event_rewrite(&rewrite)
        .await
        .expect_err("trigger aborts the write");
    assert!(matches!(error, AppError::Database { .. } | AppError::Conflict { .. }));

    one(&harness, "meet#cal").await;
    assert!(harness
        .store
        .list_events_by_ids(&["real-meet#cal".to_string()])
        .await
        .expect("renamed")
        .is_empty());
}
