mod support;

use std::collections::HashSet;
use std::time::Duration as StdDuration;

use meeting_planner_lib::db::store::PlannerStore;
use meeting_planner_lib::error::{AppError, SolverErrorCode};
use meeting_planner_lib::models::event::BufferTimes;
use meeting_planner_lib::models::meeting::{MeetingAssist, MeetingPreferredTimeRange};
use meeting_planner_lib::models::planner::{PlannerRunSnapshot, RunStatus};
use meeting_planner_lib::services::blob_store::{get_json, FsBlobStore};
use support::{at, harness, harness_with, planning_input, seed, RecordingSolver};

#[tokio::test]
async fn plan_writes_snapshot_records_run_and_submits() {
    let harness = harness();
    seed(&harness.store).await;

    let submission = harness
        .service
        .plan(planning_input())
        .await
        .expect("plan");

    // Focus 12 parts, meeting 4 plus its 15 minute prep, two breaks of two parts,
    // and the guest's four busy hours.
    assert_eq!(submission.event_part_count, 12 + 5 + 4 + 16);
    // The guest's inferred window lies inside the host's 09:00-17:00.
    assert_eq!(submission.timeslot_count, 32);
    assert_eq!(submission.break_count, 2);
    assert_eq!(submission.receipt.status, 202);

    let request = harness.solver.last_request();
    assert_eq!(request.singleton_id, submission.singleton_id);
    assert_eq!(request.file_key, submission.file_key);
    assert_eq!(request.host_id, "host");
    assert!(request.file_key.starts_with("host/"));

    let users: HashSet<&str> = request.user_list.iter().map(|user| user.id.as_str()).collect();
    assert_eq!(users, HashSet::from(["host", "guest"]));

    let meeting_parts: Vec<_> = request
        .event_parts
        .iter()
        .filter(|record| record.event_id == "meet#cal")
        .collect();
    assert_eq!(meeting_parts.len(), 4);
    let group_id = &meeting_parts[0].group_id;
    let group: Vec<_> = request
        .event_parts
        .iter()
        .filter(|record| &record.group_id == group_id)
        .collect();
    assert_eq!(group.len(), 5);
    assert!(group.iter().all(|record| record.last_part == 5));
    assert!(group
        .iter()
        .any(|record| record.is_pre_event && record.part == 1));

    for slot in &request.timeslots {
        assert_eq!(slot.host_id, "host");
        assert!(slot.start_time >= support::t(9, 0) && slot.end_time <= support::t(17, 0));
    }

    let blobs = FsBlobStore::new(harness.service.settings().blob_root.clone());
    let snapshot: PlannerRunSnapshot = get_json(&blobs, &submission.file_key)
        .await
        .expect("read snapshot")
        .expect("snapshot stored");
    assert_eq!(snapshot.request, request);
    assert_eq!(snapshot.host_timezone, support::HOST_TZ);
    assert_eq!(snapshot.breaks.len(), 2);
    assert!(snapshot
        .breaks
        .iter()
        .all(|item| item.id.ends_with("#primary") && item.is_break));
    assert_eq!(snapshot.new_buffer_pairs.len(), 1);
    let reminder_events: Vec<&str> = snapshot
        .new_reminders
        .iter()
        .map(|reminder| reminder.event_id.as_str())
        .collect();
    assert_eq!(reminder_events, vec!["meet#cal"]);
    assert!(snapshot.new_reminders[0].use_default);
    assert_eq!(snapshot.new_reminders[0].minutes, 10);

    let old_ids: HashSet<&str> = snapshot.old_events.iter().map(|event| event.id.as_str()).collect();
    assert_eq!(old_ids, HashSet::from(["focus#cal", "guest-ev#gcal"]));

    let run = harness
        .store
        .get_planner_run(&submission.singleton_id)
        .await
        .expect("get run")
        .expect("run recorded");
    assert_eq!(run.status, RunStatus::Submitted);
    assert_eq!(run.file_key, submission.file_key);
    assert!(run.callback_deadline > run.created_at);
}

#[tokio::test]
async fn explicit_reminder_minutes_override_preference() {
    let harness = harness();
    seed(&harness.store).await;

    let mut input = planning_input();
    input.reminder_minutes = vec![5, 60];
    let submission = harness.service.plan(input).await.expect("plan");

    let blobs = FsBlobStore::new(harness.service.settings().blob_root.clone());
    let snapshot: PlannerRunSnapshot = get_json(&blobs, &submission.file_key)
        .await
        .expect("read snapshot")
        .expect("snapshot stored");
    let minutes: Vec<i64> = snapshot.new_reminders.iter().map(|r| r.minutes).collect();
    assert_eq!(minutes, vec![5, 60]);
    assert!(snapshot.new_reminders.iter().all(|r| !r.use_default));
}

#[tokio::test]
async fn meeting_expands_into_sibling_copies() {
    let harness = harness();
    seed(&harness.store).await;

    let mut input = planning_input();
    input.new_events.clear();
    input.meeting = Some(MeetingAssist {
        id: "ma-1".to_string(),
        calendar_id: "cal".to_string(),
        summary: Some("Roadmap".to_string()),
        notes: None,
        duration: 45,
        priority: 2,
        buffer_time: Some(BufferTimes {
            before_event: 15,
            after_event: 0,
        }),
        preferred_time_ranges: vec![MeetingPreferredTimeRange {
            day_of_week: None,
            start_time: Some(support::t(13, 0)),
            end_time: Some(support::t(15, 0)),
        }],
    });
    let submission = harness.service.plan(input).await.expect("plan");

    let blobs = FsBlobStore::new(harness.service.settings().blob_root.clone());
    let snapshot: PlannerRunSnapshot = get_json(&blobs, &submission.file_key)
        .await
        .expect("read snapshot")
        .expect("snapshot stored");

    let copies: Vec<(String, String)> = snapshot
        .new_buffer_pairs
        .iter()
        .map(|pair| (pair.new_event.id.clone(), pair.new_event.user_id.clone()))
        .collect();
    assert_eq!(copies.len(), 2);
    let provider = copies[0].0.split('#').next().expect("provider id").to_string();
    assert_eq!(copies[0], (format!("{provider}#cal"), "host".to_string()));
    assert_eq!(copies[1], (format!("{provider}#guest"), "guest".to_string()));
    assert!(snapshot
        .new_buffer_pairs
        .iter()
        .all(|pair| pair.new_event.meeting_id.as_deref() == Some("ma-1")
            && pair.new_event.start_date == at(5, 13, 0)));

    let host_copy = format!("{provider}#cal");
    let request = harness.solver.last_request();
    let host_parts = request
        .event_parts
        .iter()
        .filter(|record| record.event_id == host_copy)
        .count();
    assert_eq!(host_parts, 3);
    assert_eq!(snapshot.new_reminders.len(), 1);
    assert_eq!(snapshot.new_reminders[0].event_id, host_copy);
}

#[tokio::test]
async fn rejected_submission_marks_run_failed() {
    let harness = harness_with(RecordingSolver::rejecting(), StdDuration::from_secs(60));
    seed(&harness.store).await;

    let error = harness
        .service
        .plan(planning_input())
        .await
        .expect_err("solver rejects");
    assert_eq!(error.solver_code(), Some(SolverErrorCode::InvalidRequest));

    let request = harness.solver.last_request();
    let run = harness
        .store
        .get_planner_run(&request.singleton_id)
        .await
        .expect("get run")
        .expect("run recorded");
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.last_error.is_some());
}

#[tokio::test]
async fn nothing_to_plan_is_a_validation_error() {
    let harness = harness();

    let mut input = planning_input();
    input.attendees.clear();
    input.new_events.clear();
    let error = harness.service.plan(input).await.expect_err("empty plan");
    assert!(matches!(error, AppError::Validation { .. }));
    assert!(harness.solver.requests.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn inverted_window_is_rejected() {
    let harness = harness();

    let mut input = planning_input();
    input.window_end = at(5, 7, 0);
    let error = harness.service.plan(input).await.expect_err("inverted window");
    assert!(matches!(error, AppError::Validation { .. }));
}

#[tokio::test]
async fn service_builds_from_settings() {
    let dir = tempfile::tempdir().expect("temp dir");
    let settings = support::settings_in(&dir, StdDuration::from_secs(60));
    let service = meeting_planner_lib::build_planning_service(settings.clone()).expect("service");
    assert_eq!(service.settings(), &settings);
    assert!(settings.database_path.exists());
}
