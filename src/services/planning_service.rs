use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::store::{EventRewrite, PlannerStore};
use crate::error::{AppError, AppResult};
use crate::models::event::{BufferPair, Event, EventMethod, Reminder};
use crate::models::meeting::MeetingAssist;
use crate::models::planner::{
    PlannerResponsePart, PlannerRunRecord, PlannerRunSnapshot, RunStatus,
};
use crate::models::settings::PlannerSettings;
use crate::services::blob_store::{get_json, put_json, BlobStore};
use crate::services::buffer_stitcher::create_buffer_events;
use crate::services::identity::IdentityTable;
use crate::services::meeting_assist::{generate_meeting_events, MeetingCopyTarget};
use crate::services::planner_request::{
    assemble_planner_request, merge_pipeline_outputs, run_attendee_pipeline, AttendeePlanInput,
    PipelineOutput, PlanningWindow,
};
use crate::services::reminder_service::create_reminders_from_minutes_and_event;
use crate::services::result_reconciler::{reconcile_plan, DEFAULT_TOLERANCE_MINUTES};
use crate::services::retry::{with_backoff, DEFAULT_BACKOFF};
use crate::services::schedule_utils::{anchor, parse_timezone};
use crate::services::solver_client::{PlannerSolver, SubmissionReceipt};
use crate::services::work_window::{AttendeeKind, DeclaredPreferences, ObservedEvents, PreferenceSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendeeRef {
    pub user_id: String,
    pub timezone: String,
    /// Forces inference from observed events even if a preference exists.
    #[serde(default)]
    pub is_external: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningInput {
    pub host_id: String,
    pub host_timezone: String,
    /// Host wall-clock start of the window; also the instant the plan is made.
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    #[serde(default)]
    pub attendees: Vec<AttendeeRef>,
    /// New meeting copies, one per owning user. Copies with `timeBlocking` get buffers.
    #[serde(default)]
    pub new_events: Vec<Event>,
    /// Meeting to place; expanded into a host copy plus one copy per attendee.
    #[serde(default)]
    pub meeting: Option<MeetingAssist>,
    /// Reminder offsets for every new event. Empty means the owner's defaults.
    #[serde(default)]
    pub reminder_minutes: Vec<i64>,
    #[serde(default)]
    pub replan_event_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanSubmission {
    pub singleton_id: String,
    pub file_key: String,
    pub receipt: SubmissionReceipt,
    pub event_part_count: usize,
    pub timeslot_count: usize,
    pub break_count: usize,
}

#[derive(Debug)]
pub struct CallbackOutcome {
    pub singleton_id: String,
    pub persisted: Vec<Event>,
    pub unchanged: Vec<String>,
    pub failures: Vec<(String, String)>,
}

pub struct PlanningService {
    store: Arc<dyn PlannerStore>,
    blobs: Arc<dyn BlobStore>,
    solver: Arc<dyn PlannerSolver>,
    settings: PlannerSettings,
    store_backoff: Vec<StdDuration>,
    tolerance_minutes: i64,
}

impl PlanningService {
    pub fn new(
        store: Arc<dyn PlannerStore>,
        blobs: Arc<dyn BlobStore>,
        solver: Arc<dyn PlannerSolver>,
        settings: PlannerSettings,
    ) -> Self {
        Self {
            store,
            blobs,
            solver,
            settings,
            store_backoff: DEFAULT_BACKOFF.to_vec(),
            tolerance_minutes: DEFAULT_TOLERANCE_MINUTES,
        }
    }

    pub fn with_store_backoff(mut self, schedule: Vec<StdDuration>) -> Self {
        self.store_backoff = schedule;
        self
    }

    pub fn with_tolerance_minutes(mut self, tolerance_minutes: i64) -> Self {
        self.tolerance_minutes = tolerance_minutes.max(0);
        self
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    /// Prepares, persists and submits one planning run.
    pub async fn plan(&self, input: PlanningInput) -> AppResult<PlanSubmission> {
        let host_tz = parse_timezone(&input.host_timezone)?;
        if input.window_end <= input.window_start {
            return Err(AppError::validation("排程窗口结束时间必须晚于开始时间"));
        }
        let window = PlanningWindow {
            host_id: input.host_id.clone(),
            host_timezone: host_tz,
            start: input.window_start,
            end: input.window_end,
            granularity: self.settings.granularity,
        };

        let mut requested = input.new_events.clone();
        if let Some(meeting) = &input.meeting {
            requested.extend(self.meeting_copies(meeting, &input).await?);
        }
        let (new_events, buffer_pairs) = expand_buffers(&requested)?;

        let mut attendees = vec![AttendeeRef {
            user_id: input.host_id.clone(),
            timezone: input.host_timezone.clone(),
            is_external: false,
        }];
        let mut seen: HashSet<String> = HashSet::from([input.host_id.clone()]);
        for attendee in &input.attendees {
            if seen.insert(attendee.user_id.clone()) {
                attendees.push(attendee.clone());
            }
        }

        let (range_start, range_end) = window_range_utc(&window)?;
        let concurrency = self.settings.max_concurrency.max(1);
        let host_id = input.host_id.as_str();

        let mut prepared: Vec<(usize, AppResult<(PipelineOutput, Vec<Event>, Option<Vec<i64>>)>)> =
            stream::iter(attendees.iter().enumerate())
                .map(|(index, attendee)| {
                    let new_events = &new_events;
                    let window = &window;
                    async move {
                        let result = self
                            .prepare_attendee(
                                window,
                                attendee,
                                attendee.user_id == host_id,
                                new_events,
                                range_start,
                                range_end,
                            )
                            .await;
                        (index, result)
                    }
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;
        prepared.sort_by_key(|(index, _)| *index);

        let mut outputs = Vec::with_capacity(prepared.len());
        let mut old_events = Vec::new();
        let mut default_reminders: Vec<(String, Vec<i64>)> = Vec::new();
        for ((_, result), attendee) in prepared.into_iter().zip(&attendees) {
            let (output, existing, reminders) = result?;
            outputs.push(output);
            old_events.extend(existing);
            if let Some(minutes) = reminders {
                default_reminders.push((attendee.user_id.clone(), minutes));
            }
        }

        let new_reminders = self.build_reminders(&input, &new_events, &default_reminders);
        let merged = merge_pipeline_outputs(outputs);
        let request = assemble_planner_request(
            host_id,
            &merged,
            self.settings.solver_delay,
            &self.settings.callback_url,
            input.replan_event_id.as_deref(),
        )?;

        let now = Utc::now();
        let snapshot = PlannerRunSnapshot {
            singleton_id: request.singleton_id.clone(),
            host_id: input.host_id.clone(),
            host_timezone: input.host_timezone.clone(),
            granularity: self.settings.granularity,
            request: request.clone(),
            all_events: merged.all_events.clone(),
            breaks: merged.breaks.clone(),
            old_events,
            new_buffer_pairs: buffer_pairs,
            new_reminders,
            created_at: now,
        };
        put_json(self.blobs.as_ref(), &request.file_key, &snapshot).await?;

        let callback_deadline = now
            + Duration::from_std(self.settings.callback_deadline)
                .map_err(|err| AppError::validation(format!("回调截止时间无效: {err}")))?;
        self.store
            .record_planner_run(&PlannerRunRecord {
                singleton_id: request.singleton_id.clone(),
                host_id: input.host_id.clone(),
                file_key: request.file_key.clone(),
                status: RunStatus::Submitted,
                callback_deadline,
                last_error: None,
                created_at: now,
                updated_at: now,
            })
            .await?;

        let receipt = match self.solver.submit(&request).await {
            Ok(receipt) => receipt,
            Err(error) => {
                self.store
                    .update_planner_run_status(
                        &request.singleton_id,
                        RunStatus::Failed,
                        Some(error.to_string()),
                    )
                    .await?;
                return Err(error);
            }
        };

        info!(
            target: "app::planner",
            singleton_id = %request.singleton_id,
            host_id = %input.host_id,
            attendees = attendees.len(),
            parts = request.event_parts.len(),
            timeslots = request.timeslots.len(),
            "planning run submitted"
        );

        Ok(PlanSubmission {
            singleton_id: request.singleton_id,
            file_key: request.file_key,
            receipt,
            event_part_count: request.event_parts.len(),
            timeslot_count: request.timeslots.len(),
            break_count: snapshot.breaks.len(),
        })
    }

    /// Calendar copies of `meeting`. Internal attendees get theirs on their global calendar.
    async fn meeting_copies(&self, meeting: &MeetingAssist, input: &PlanningInput) -> AppResult<Vec<Event>> {
        let mut targets = Vec::with_capacity(input.attendees.len());
        for attendee in &input.attendees {
            let calendar_id = if attendee.is_external {
                None
            } else {
                with_backoff("store.get_global_calendar_id", &self.store_backoff, |_| {
                    self.store.get_global_calendar_id(&attendee.user_id)
                })
                .await?
            };
            targets.push(MeetingCopyTarget {
                user_id: attendee.user_id.clone(),
                calendar_id,
            });
        }
        generate_meeting_events(
            meeting,
            &input.host_id,
            &targets,
            input.window_start,
            input.window_end,
            &input.host_timezone,
        )
    }

    async fn prepare_attendee(
        &self,
        window: &PlanningWindow,
        attendee: &AttendeeRef,
        is_host: bool,
        new_events: &[Event],
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    ) -> AppResult<(PipelineOutput, Vec<Event>, Option<Vec<i64>>)> {
        let user_id = attendee.user_id.as_str();
        let events = with_backoff("store.list_events_for_user", &self.store_backoff, |_| {
            self.store.list_events_for_user(user_id, range_start, range_end)
        })
        .await?;

        let preference = if attendee.is_external {
            None
        } else {
            with_backoff("store.get_work_preference", &self.store_backoff, |_| {
                self.store.get_work_preference(user_id)
            })
            .await?
        };
        let global_calendar_id = with_backoff("store.get_global_calendar_id", &self.store_backoff, |_| {
            self.store.get_global_calendar_id(user_id)
        })
        .await?;

        let parent_ids: Vec<String> = events
            .iter()
            .filter_map(|event| event.recurring_event_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let recurring_parents = if parent_ids.is_empty() {
            Vec::new()
        } else {
            with_backoff("store.list_events_by_ids", &self.store_backoff, |_| {
                self.store.list_events_by_ids(&parent_ids)
            })
            .await?
        };

        let timezone: Tz = parse_timezone(&attendee.timezone)?;
        let reminders = preference.as_ref().map(|pref| pref.reminders.clone());

        let source: Box<dyn PreferenceSource> = match preference {
            Some(preference) => {
                let kind = if is_host {
                    AttendeeKind::Host
                } else {
                    AttendeeKind::Internal
                };
                Box::new(DeclaredPreferences::new(preference, timezone, kind))
            }
            None => Box::new(ObservedEvents::new(
                user_id,
                events.clone(),
                timezone,
                window.granularity,
            )),
        };

        let own_new_events: Vec<Event> = new_events
            .iter()
            .filter(|event| event.user_id == user_id)
            .cloned()
            .collect();

        let output = run_attendee_pipeline(
            window,
            AttendeePlanInput {
                source: source.as_ref(),
                events: events.clone(),
                new_events: own_new_events,
                recurring_parents,
                global_calendar_id,
            },
        )?;

        Ok((output, events, reminders))
    }

    fn build_reminders(
        &self,
        input: &PlanningInput,
        new_events: &[Event],
        defaults: &[(String, Vec<i64>)],
    ) -> Vec<Reminder> {
        new_events
            .iter()
            .filter(|event| !event.is_pre_event && !event.is_post_event)
            .flat_map(|event| {
                let (minutes, use_default) = if input.reminder_minutes.is_empty() {
                    let owner_defaults = defaults
                        .iter()
                        .find(|(user_id, _)| *user_id == event.user_id)
                        .map(|(_, minutes)| minutes.clone())
                        .unwrap_or_default();
                    (owner_defaults, true)
                } else {
                    (input.reminder_minutes.clone(), false)
                };
                create_reminders_from_minutes_and_event(
                    &event.id,
                    &event.user_id,
                    event.timezone.as_deref(),
                    &minutes,
                    use_default,
                )
            })
            .collect()
    }

    /// Applies a solver callback for `singleton_id` and persists the moved events.
    pub async fn handle_callback(
        &self,
        singleton_id: &str,
        responses: Vec<Vec<PlannerResponsePart>>,
    ) -> AppResult<CallbackOutcome> {
        let Some(run) = self.store.get_planner_run(singleton_id).await? else {
            warn!(target: "app::reconcile", %singleton_id, "callback for unknown run");
            return Err(AppError::not_found());
        };
        if run.status != RunStatus::Submitted {
            return Err(AppError::conflict(format!(
                "排程 {singleton_id} 已处于 {} 状态",
                run.status
            )));
        }
        if Utc::now() > run.callback_deadline {
            self.store
                .update_planner_run_status(
                    singleton_id,
                    RunStatus::Stale,
                    Some("callback arrived after deadline".to_string()),
                )
                .await?;
            return Err(AppError::stale_plan(singleton_id));
        }

        let Some(snapshot) =
            get_json::<PlannerRunSnapshot>(self.blobs.as_ref(), &run.file_key).await?
        else {
            self.store
                .update_planner_run_status(
                    singleton_id,
                    RunStatus::Failed,
                    Some(format!("snapshot {} missing", run.file_key)),
                )
                .await?;
            return Err(AppError::not_found());
        };

        let plan = match reconcile_plan(&responses, &snapshot, self.tolerance_minutes) {
            Ok(plan) => plan,
            Err(error) => {
                self.store
                    .update_planner_run_status(singleton_id, RunStatus::Failed, Some(error.to_string()))
                    .await?;
                return Err(error);
            }
        };

        if !plan.events.is_empty() {
            self.store.upsert_events(&plan.events).await?;
        }
        let persisted_ids: HashSet<&str> = plan.events.iter().map(|event| event.id.as_str()).collect();
        let reminders: Vec<Reminder> = snapshot
            .new_reminders
            .iter()
            .filter(|reminder| persisted_ids.contains(reminder.event_id.as_str()))
            .cloned()
            .collect();
        if !reminders.is_empty() {
            self.store.upsert_reminders(&reminders).await?;
        }

        let failures: Vec<(String, String)> = plan
            .failures
            .iter()
            .map(|failure| (failure.event_id.clone(), failure.error.to_string()))
            .collect();
        let last_error = if failures.is_empty() {
            None
        } else {
            Some(
                failures
                    .iter()
                    .map(|(event_id, message)| format!("{event_id}: {message}"))
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };
        self.store
            .update_planner_run_status(singleton_id, RunStatus::Reconciled, last_error)
            .await?;

        info!(
            target: "app::reconcile",
            %singleton_id,
            persisted = plan.events.len(),
            failed = failures.len(),
            "callback handled"
        );

        Ok(CallbackOutcome {
            singleton_id: singleton_id.to_string(),
            persisted: plan.events,
            unchanged: plan.unchanged,
            failures,
        })
    }

    /// Rewrites stored events and their dependents after upstream creation
    /// replaced placeholder ids with real provider ids.
    pub async fn apply_provider_ids(&self, created: &[(String, String)]) -> AppResult<IdentityTable> {
        let mut table = IdentityTable::new();
        for (placeholder_id, real_provider_id) in created {
            table.record_created(placeholder_id, real_provider_id);
        }
        if table.is_empty() {
            return Ok(table);
        }

        let placeholder_ids: Vec<String> = created.iter().map(|(id, _)| id.clone()).collect();
        let linked = self.store.list_events_linked_to(&placeholder_ids).await?;

        let mut rewrite = EventRewrite::default();
        for mut event in linked {
            let old_id = event.id.clone();
            table.apply_to_event(&mut event);
            if event.id != old_id {
                rewrite
                    .reminders
                    .extend(self.store.list_reminders_for_event(&old_id).await?);
                rewrite
                    .preferred_time_ranges
                    .extend(self.store.list_preferred_time_ranges_for_event(&old_id).await?);
                rewrite
                    .attendees
                    .extend(self.store.list_attendees_for_event(&old_id).await?);
                rewrite.removed_ids.push(old_id);
            }
            rewrite.events.push(event);
        }
        table.apply_to_reminders(&mut rewrite.reminders);
        table.apply_to_preferred_time_ranges(&mut rewrite.preferred_time_ranges);
        table.apply_to_attendees(&mut rewrite.attendees);

        self.store.apply_event_rewrite(&rewrite).await?;

        info!(
            target: "app::planner",
            events = rewrite.events.len(),
            renamed = rewrite.removed_ids.len(),
            reminders = rewrite.reminders.len(),
            attendees = rewrite.attendees.len(),
            "provider ids applied"
        );
        Ok(table)
    }
}

/// New events, marked for creation, plus the buffer events their `timeBlocking` asks for.
fn expand_buffers(new_events: &[Event]) -> AppResult<(Vec<Event>, Vec<BufferPair>)> {
    let mut events = Vec::with_capacity(new_events.len());
    let mut pairs = Vec::new();
    for event in new_events {
        let mut event = event.clone();
        event.method.get_or_insert(EventMethod::Create);
        match event.time_blocking {
            Some(times) if times.before_event > 0 || times.after_event > 0 => {
                let pair = create_buffer_events(&event, times)?;
                events.push(pair.new_event.clone());
                events.extend(pair.before_event.clone());
                events.extend(pair.after_event.clone());
                pairs.push(pair);
            }
            _ => events.push(event),
        }
    }
    Ok((events, pairs))
}

/// UTC bounds covering every whole host day the window touches.
fn window_range_utc(window: &PlanningWindow) -> AppResult<(DateTime<Utc>, DateTime<Utc>)> {
    let first_day = window.start.date().and_time(NaiveTime::MIN);
    let after_last_day = window
        .end
        .date()
        .succ_opt()
        .ok_or_else(|| AppError::validation("排程窗口超出日期范围"))?
        .and_time(NaiveTime::MIN);
    Ok((
        anchor(first_day, window.host_timezone)?.with_timezone(&Utc),
        anchor(after_last_day, window.host_timezone)?.with_timezone(&Utc),
    ))
}
