mod support;

use std::collections::HashSet;
use std::time::Duration as StdDuration;

use meeting_planner_lib::db::store::PlannerStore;
use meeting_planner_lib::error::AppError;
use meeting_planner_lib::models::event::EventMethod;
use meeting_planner_lib::models::planner::{PlannerRequest, PlannerResponsePart, RunStatus};
use support::{assign, at, harness, harness_with, planning_input, seed, t, Harness, RecordingSolver};

fn pre_buffer_id(request: &PlannerRequest) -> String {
    request
        .event_parts
        .iter()
        .find(|record| record.is_pre_event && record.for_event_id.as_deref() == Some("meet#cal"))
        .map(|record| record.event_id.clone())
        .expect("prep buffer was planned")
}

fn break_ids(request: &PlannerRequest) -> Vec<String> {
    let mut ids: Vec<String> = request
        .event_parts
        .iter()
        .filter(|record| record.event_id.ends_with("#primary"))
        .map(|record| record.event_id.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    ids.sort();
    ids
}

/// Solver answer that moves the meeting (and its prep) to 15:00 and keeps
/// everything else where the request had it.
fn answer(request: &PlannerRequest) -> Vec<Vec<PlannerResponsePart>> {
    let mut responses = vec![
        assign(request, &pre_buffer_id(request), t(14, 45)),
        assign(request, "meet#cal", t(15, 0)),
        assign(request, "focus#cal", t(9, 0)),
        assign(request, "guest-ev#gcal", t(9, 0)),
    ];
    for id in break_ids(request) {
        let start = request
            .event_parts
            .iter()
            .filter(|record| record.event_id == id)
            .map(|record| record.start_date.time())
            .min()
            .expect("break part");
        responses.push(assign(request, &id, start));
    }
    responses
}

async fn planned() -> (Harness, PlannerRequest) {
    let harness = harness();
    seed(&harness.store).await;
    harness.service.plan(planning_input()).await.expect("plan");
    let request = harness.solver.last_request();
    (harness, request)
}

#[tokio::test]
async fn callback_persists_new_and_moved_events() {
    let (harness, request) = planned().await;
    let pre_id = pre_buffer_id(&request);

    let outcome = harness
        .service
        .handle_callback(&request.singleton_id, answer(&request))
        .await
        .expect("callback");

    assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);
    let persisted: HashSet<&str> = outcome.persisted.iter().map(|event| event.id.as_str()).collect();
    assert!(persisted.contains("meet#cal"));
    assert!(persisted.contains(pre_id.as_str()));
    assert_eq!(persisted.len(), 4, "meeting, prep and two breaks");
    assert!(outcome
        .persisted
        .iter()
        .all(|event| event.method == Some(EventMethod::Create)));
    let unchanged: HashSet<&str> = outcome.unchanged.iter().map(String::as_str).collect();
    assert_eq!(unchanged, HashSet::from(["focus#cal", "guest-ev#gcal"]));

    let stored = harness
        .store
        .list_events_by_ids(&["meet#cal".to_string(), pre_id.clone()])
        .await
        .expect("stored events");
    let meeting = stored
        .iter()
        .find(|event| event.id == "meet#cal")
        .expect("meeting stored");
    assert_eq!(meeting.start_date, at(5, 15, 0));
    assert_eq!(meeting.end_date, at(5, 16, 0));
    let prep = stored
        .iter()
        .find(|event| event.id == pre_id)
        .expect("prep stored");
    assert_eq!(prep.start_date, at(5, 14, 45));
    assert_eq!(prep.end_date, at(5, 15, 0));

    let reminders = harness
        .store
        .list_reminders_for_event("meet#cal")
        .await
        .expect("reminders");
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].minutes, 10);

    let run = harness
        .store
        .get_planner_run(&request.singleton_id)
        .await
        .expect("get run")
        .expect("run");
    assert_eq!(run.status, RunStatus::Reconciled);
    assert_eq!(run.last_error, None);

    let again = harness
        .service
        .handle_callback(&request.singleton_id, answer(&request))
        .await
        .expect_err("run already reconciled");
    assert!(matches!(again, AppError::Conflict { .. }));
}

#[tokio::test]
async fn incomplete_assignment_fails_only_that_event() {
    let (harness, request) = planned().await;

    let mut responses = answer(&request);
    let meeting = responses
        .iter_mut()
        .find(|group| group.first().map(|part| part.event_id.as_str()) == Some("meet#cal"))
        .expect("meeting group");
    meeting.pop();

    let outcome = harness
        .service
        .handle_callback(&request.singleton_id, responses)
        .await
        .expect("callback");

    let failed: Vec<&str> = outcome.failures.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(failed, vec!["meet#cal"]);
    assert!(outcome.persisted.iter().all(|event| event.id != "meet#cal"));
    assert!(harness
        .store
        .list_reminders_for_event("meet#cal")
        .await
        .expect("reminders")
        .is_empty());

    let run = harness
        .store
        .get_planner_run(&request.singleton_id)
        .await
        .expect("get run")
        .expect("run");
    assert_eq!(run.status, RunStatus::Reconciled);
    assert!(run.last_error.as_deref().is_some_and(|text| text.contains("meet#cal")));
}

#[tokio::test]
async fn unknown_run_is_not_found() {
    let harness = harness();
    let error = harness
        .service
        .handle_callback("no-such-run", Vec::new())
        .await
        .expect_err("unknown run");
    assert!(matches!(error, AppError::NotFound));
}

#[tokio::test]
async fn late_callback_marks_run_stale() {
    let harness = harness_with(RecordingSolver::default(), StdDuration::ZERO);
    seed(&harness.store).await;
    harness.service.plan(planning_input()).await.expect("plan");
    let request = harness.solver.last_request();

    tokio::time::sleep(StdDuration::from_millis(20)).await;
    let error = harness
        .service
        .handle_callback(&request.singleton_id, answer(&request))
        .await
        .expect_err("stale");
    assert!(matches!(error, AppError::StalePlan { .. }));

    let run = harness
        .store
        .get_planner_run(&request.singleton_id)
        .await
        .expect("get run")
        .expect("run");
    assert_eq!(run.status, RunStatus::Stale);
    assert!(harness
        .store
        .list_events_by_ids(&["meet#cal".to_string()])
        .await
        .expect("events")
        .is_empty());
}

#[tokio::test]
async fn provider_ids_replace_placeholders() {
    let (harness, request) = planned().await;
    harness
        .service
        .handle_callback(&request.singleton_id, answer(&request))
        .await
        .expect("callback");

    let table = harness
        .service
        .apply_provider_ids(&[("meet#cal".to_string(), "evt-123".to_string())])
        .await
        .expect("apply ids");
    assert_eq!(table.resolve("meet#cal"), "evt-123#cal");

    let old = harness
        .store
        .list_events_by_ids(&["meet#cal".to_string()])
        .await
        .expect("old id");
    assert!(old.is_empty());

    let renamed = harness
        .store
        .list_events_by_ids(&["evt-123#cal".to_string()])
        .await
        .expect("new id");
    assert_eq!(renamed.len(), 1);
    assert_eq!(renamed[0].event_id.as_deref(), Some("evt-123"));
    assert_eq!(renamed[0].start_date, at(5, 15, 0));

    let reminders = harness
        .store
        .list_reminders_for_event("evt-123#cal")
        .await
        .expect("reminders");
    assert_eq!(reminders.len(), 1);
    assert!(harness
        .store
        .list_reminders_for_event("meet#cal")
        .await
        .expect("old reminders")
        .is_empty());
}

#[tokio::test]
async fn tolerance_admits_a_one_slot_gap() {
    let (harness, request) = planned().await;
    let service = harness.service.with_tolerance_minutes(15);

    let mut responses = answer(&request);
    let meeting = responses
        .iter_mut()
        .find(|group| group.first().map(|part| part.event_id.as_str()) == Some("meet#cal"))
        .expect("meeting group");
    let last = meeting.last_mut().expect("last part");
    last.timeslot.start_time = t(16, 0);
    last.timeslot.end_time = t(16, 15);

    let outcome = service
        .handle_callback(&request.singleton_id, responses)
        .await
        .expect("callback");
    assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);

    let meeting = outcome
        .persisted
        .iter()
        .find(|event| event.id == "meet#cal")
        .expect("meeting persisted");
    assert_eq!(meeting.start_date, at(5, 15, 0));
    assert_eq!(meeting.end_date, at(5, 16, 0));
}
