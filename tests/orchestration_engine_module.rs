use chrono::{DateTime, TimeZone, Utc};
use chronos::calendar::{
    attendee_set, CalendarSnapshot, Candidate, Event, FetchError, Priority, Request,
    RequestConstraints, ResolutionStrategy, SnapshotLoader, StaticSnapshotLoader, TimeWindow,
    WorkingHoursProbe,
};
use chronos::config::Settings;
use chronos::gate::{
    ActionIntent, ExecutionError, ExecutionReceipt, Executor, GateRejection, GateResult,
    IntentCategory, IntentPayload, IntentRecord, IntentStatus, RecordingExecutor,
};
use chronos::orchestration::{
    load_outcome, load_progress, Collaborators, ErrorKind, Orchestrator, OrchestratorError,
    RunOptions, Stage, StageDelta, StageEvent, StageEvents, Trigger,
};
use chronos::reasoner::{ReasonerError, ScriptedReasoner};
use chronos::shared::ids::{EventId, OptionId};
use chronos::shared::logging::chronos_log_path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, hour, minute, 0).unwrap()
}

fn review() -> Candidate {
    Candidate {
        title: "Design review".to_string(),
        start: at(14, 0),
        end: at(15, 0),
        attendees: attendee_set(["al@example.com", "bo@example.com"]).expect("attendees"),
        priority: Priority::Normal,
        resource: None,
    }
}

fn request(text: &str) -> Request {
    Request::new(text, at(8, 0)).with_constraints(RequestConstraints {
        duration_minutes: Some(60),
        attendees: attendee_set(["al@example.com", "bo@example.com"]).expect("attendees"),
        ..RequestConstraints::default()
    })
}

fn engineering_sync() -> Event {
    Event {
        id: EventId::parse("evt-sync").expect("event id"),
        title: "Engineering Sync".to_string(),
        start: at(14, 0),
        end: at(15, 0),
        attendees: attendee_set(["al@example.com", "cy@example.com"]).expect("attendees"),
        priority: Priority::Normal,
        mutable: true,
        resource: None,
    }
}

fn options() -> RunOptions {
    RunOptions {
        stage_timeout: Duration::from_secs(5),
        ..RunOptions::default()
    }
}

fn orchestrator(
    loader: Arc<dyn SnapshotLoader>,
    reasoner: Arc<ScriptedReasoner>,
    executor: Arc<dyn Executor>,
    settings: Settings,
) -> Orchestrator {
    Orchestrator::new(
        Collaborators::new(
            loader,
            Arc::new(WorkingHoursProbe::default()),
            reasoner,
            executor,
        ),
        settings,
    )
}

fn static_orchestrator(events: Vec<Event>, executor: Arc<RecordingExecutor>) -> Orchestrator {
    orchestrator(
        Arc::new(StaticSnapshotLoader::new(events)),
        Arc::new(ScriptedReasoner::proposing(review())),
        executor,
        Settings::default(),
    )
}

fn wait_for(events: &mut StageEvents, stage: Stage) -> StageEvent {
    for event in events.by_ref() {
        if event.to == stage {
            return event;
        }
        assert!(
            !event.is_terminal(),
            "run ended in `{}` before reaching `{stage}`",
            event.to
        );
    }
    panic!("event stream closed before `{stage}`");
}

fn drafted_intents(event: &StageEvent) -> Vec<IntentRecord> {
    match &event.delta {
        StageDelta::IntentsDrafted { intents } => intents.clone(),
        other => panic!("expected drafted intents, got {other:?}"),
    }
}

struct SlowExecutor {
    delay: Duration,
    inner: RecordingExecutor,
}

impl SlowExecutor {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: RecordingExecutor::new(),
        }
    }
}

impl Executor for SlowExecutor {
    fn execute(&self, intent: &ActionIntent) -> Result<ExecutionReceipt, ExecutionError> {
        thread::sleep(self.delay);
        self.inner.execute(intent)
    }
}

struct FlakyLoader {
    failures: usize,
    error: FetchError,
    calls: AtomicUsize,
    inner: StaticSnapshotLoader,
}

impl FlakyLoader {
    fn new(failures: usize, error: FetchError) -> Self {
        Self {
            failures,
            error,
            calls: AtomicUsize::new(0),
            inner: StaticSnapshotLoader::new(Vec::new()),
        }
    }
}

impl SnapshotLoader for FlakyLoader {
    fn load_snapshot(&self, window: TimeWindow) -> Result<CalendarSnapshot, FetchError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(self.error.clone());
        }
        self.inner.load_snapshot(window)
    }
}

#[test]
fn orchestration_engine_module_free_slot_waits_for_confirmation_then_executes() {
    let executor = Arc::new(RecordingExecutor::new());
    let orchestrator = static_orchestrator(Vec::new(), executor.clone());
    let mut handle = orchestrator
        .start_run(request("Design review with al and bo tomorrow"), options())
        .expect("start run");
    let mut events = handle.subscribe().expect("subscribe");

    let drafted = wait_for(&mut events, Stage::AwaitingConfirmation);
    let intents = drafted_intents(&drafted);
    let writes = intents
        .iter()
        .filter(|intent| intent.category == IntentCategory::CalendarWrite)
        .collect::<Vec<_>>();
    assert_eq!(writes.len(), 1);
    assert!(matches!(
        &writes[0].payload,
        IntentPayload::CreateEvent { start, .. } if *start == at(14, 0)
    ));
    assert!(intents
        .iter()
        .all(|intent| intent.status() == IntentStatus::Drafted));
    assert_eq!(executor.call_count(), 0);

    for intent in &intents {
        handle.confirm(&intent.id).expect("confirm");
    }
    let outcome = handle.result().expect("outcome");

    assert_eq!(outcome.final_stage, Stage::Completed);
    assert!(outcome.is_completed());
    assert!(outcome.error.is_none());
    assert_eq!(executor.call_count(), intents.len());
    assert_eq!(outcome.receipts.len(), intents.len());
    assert!(outcome
        .intents
        .iter()
        .all(|intent| intent.status() == IntentStatus::Executed));
    let path = outcome.log.iter().map(|event| event.to).collect::<Vec<_>>();
    assert_eq!(
        path,
        vec![
            Stage::Analyzing,
            Stage::Proposing,
            Stage::ConflictCheck,
            Stage::Drafting,
            Stage::AwaitingConfirmation,
            Stage::Executing,
            Stage::Completed,
        ]
    );
    assert!(outcome.log.iter().all(|event| event.stage_completed));
    assert!(outcome.summary.contains("Design review"));
}

#[test]
fn orchestration_engine_module_conflict_is_resolved_by_shifting() {
    let executor = Arc::new(RecordingExecutor::new());
    let orchestrator = static_orchestrator(vec![engineering_sync()], executor.clone());
    let mut handle = orchestrator
        .start_run(request("Design review with al and bo"), options())
        .expect("start run");
    let mut events = handle.subscribe().expect("subscribe");

    let resolving = wait_for(&mut events, Stage::Resolving);
    match &resolving.delta {
        StageDelta::ConflictsDetected { conflicts, options } => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(options[0].strategy(), ResolutionStrategy::ShiftCandidate);
        }
        other => panic!("expected conflicts, got {other:?}"),
    }
    let drafted = wait_for(&mut events, Stage::AwaitingConfirmation);
    let intents = drafted_intents(&drafted);
    assert!(intents.iter().any(|intent| matches!(
        &intent.payload,
        IntentPayload::CreateEvent { start, .. } if *start == at(13, 0)
    )));
    assert!(intents
        .iter()
        .all(|intent| !matches!(intent.payload, IntentPayload::MoveEvent { .. })));

    handle.cancel();
    let outcome = handle.result().expect("outcome");
    assert_eq!(outcome.final_stage, Stage::Cancelled);
    let selected = outcome.selected_option.expect("selected option");
    assert_eq!(selected.strategy(), ResolutionStrategy::ShiftCandidate);
    assert_eq!(outcome.candidate.expect("final candidate").start, at(13, 0));
    assert_eq!(
        outcome.proposed_candidate.expect("proposal").start,
        at(14, 0)
    );
}

#[test]
fn orchestration_engine_module_interactive_choice_moves_the_existing_event() {
    let executor = Arc::new(RecordingExecutor::new());
    let orchestrator = static_orchestrator(vec![engineering_sync()], executor.clone());
    let mut handle = orchestrator
        .start_run(
            request("Design review with al and bo"),
            RunOptions {
                interactive_resolution: true,
                ..options()
            },
        )
        .expect("start run");
    let mut events = handle.subscribe().expect("subscribe");

    let resolving = wait_for(&mut events, Stage::Resolving);
    let move_id = match &resolving.delta {
        StageDelta::ConflictsDetected { options, .. } => options
            .iter()
            .find(|option| option.strategy() == ResolutionStrategy::MoveExisting)
            .map(|option| option.id.clone())
            .expect("move option"),
        other => panic!("expected conflicts, got {other:?}"),
    };
    let unknown = handle
        .choose_option(&OptionId::parse("no-such-option").expect("id"))
        .expect_err("unknown option");
    assert!(matches!(unknown, OrchestratorError::UnknownOption { .. }));
    handle.choose_option(&move_id).expect("choose move");

    let drafted = wait_for(&mut events, Stage::AwaitingConfirmation);
    let intents = drafted_intents(&drafted);
    assert!(intents.iter().any(|intent| matches!(
        &intent.payload,
        IntentPayload::MoveEvent { new_start, .. } if *new_start == at(15, 0)
    )));
    assert!(intents.iter().any(|intent| matches!(
        &intent.payload,
        IntentPayload::CreateEvent { start, .. } if *start == at(14, 0)
    )));

    for intent in &intents {
        handle.confirm(&intent.id).expect("confirm");
    }
    let outcome = handle.result().expect("outcome");
    assert_eq!(outcome.final_stage, Stage::Completed);
    assert_eq!(executor.call_count(), intents.len());
    assert_eq!(
        outcome.selected_option.expect("selected").id,
        move_id
    );
}

#[test]
fn orchestration_engine_module_outsider_mention_is_rejected_at_confirmation() {
    let executor = Arc::new(RecordingExecutor::new());
    let orchestrator = static_orchestrator(Vec::new(), executor.clone());
    let mut handle = orchestrator
        .start_run(
            request("Design review with al and bo, and cc mallory@evil.example"),
            options(),
        )
        .expect("start run");
    let mut events = handle.subscribe().expect("subscribe");

    let intents = drafted_intents(&wait_for(&mut events, Stage::AwaitingConfirmation));
    let message = intents
        .iter()
        .find(|intent| intent.category == IntentCategory::Message)
        .expect("message intent");
    let create = intents
        .iter()
        .find(|intent| intent.category == IntentCategory::CalendarWrite)
        .expect("create intent");

    let err = handle.confirm(&message.id).expect_err("outsider mention");
    assert!(matches!(
        err,
        OrchestratorError::Gate(GateRejection::MentionsOutsideAllowList { .. })
    ));
    handle.confirm(&create.id).expect("confirm create");
    let outcome = handle.result().expect("outcome");

    assert_eq!(outcome.final_stage, Stage::Completed);
    assert_eq!(outcome.intent_status(&message.id), Some(IntentStatus::Rejected));
    assert_eq!(outcome.intent_status(&create.id), Some(IntentStatus::Executed));
    assert_eq!(outcome.gate_rejections.len(), 1);
    let executed = executor.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].id, create.id);
}

#[test]
fn orchestration_engine_module_dry_run_never_calls_the_executor() {
    let executor = Arc::new(RecordingExecutor::new());
    let orchestrator = static_orchestrator(Vec::new(), executor.clone());
    let mut handle = orchestrator
        .start_run(
            request("Design review with al and bo"),
            RunOptions {
                dry_run: true,
                ..options()
            },
        )
        .expect("start run");
    let mut events = handle.subscribe().expect("subscribe");

    let intents = drafted_intents(&wait_for(&mut events, Stage::AwaitingConfirmation));
    for intent in &intents {
        handle.confirm(&intent.id).expect("confirm");
    }
    let outcome = handle.result().expect("outcome");

    assert_eq!(outcome.final_stage, Stage::Completed);
    assert_eq!(executor.call_count(), 0);
    assert!(outcome.receipts.is_empty());
    assert_eq!(outcome.dry_run_effects.len(), intents.len());
    assert!(outcome
        .intents
        .iter()
        .all(|intent| intent.status() == IntentStatus::Confirmed));
}

#[test]
fn orchestration_engine_module_slow_reasoner_times_out_the_proposing_stage() {
    let executor = Arc::new(RecordingExecutor::new());
    let reasoner = Arc::new(ScriptedReasoner::proposing(review()).with_delay(Duration::from_secs(2)));
    let orchestrator = orchestrator(
        Arc::new(StaticSnapshotLoader::new(Vec::new())),
        reasoner.clone(),
        executor.clone(),
        Settings::default(),
    );
    let handle = orchestrator
        .start_run(
            request("Design review with al and bo"),
            RunOptions {
                stage_timeout: Duration::from_millis(150),
                ..options()
            },
        )
        .expect("start run");
    let outcome = handle.result().expect("outcome");

    assert_eq!(outcome.final_stage, Stage::Failed);
    let error = outcome.error.expect("error");
    assert_eq!(error.kind, ErrorKind::Timeout);
    let last = outcome.log.last().expect("last event");
    assert_eq!(last.from, Stage::Proposing);
    assert_eq!(last.trigger, Trigger::Fail);
    assert!(!last.stage_completed);
    assert!(outcome.intents.is_empty());
    assert_eq!(executor.call_count(), 0);
}

#[test]
fn orchestration_engine_module_cancel_rejects_drafted_intents() {
    let executor = Arc::new(RecordingExecutor::new());
    let orchestrator = static_orchestrator(Vec::new(), executor.clone());
    let mut handle = orchestrator
        .start_run(request("Design review with al and bo"), options())
        .expect("start run");
    let mut events = handle.subscribe().expect("subscribe");

    let intents = drafted_intents(&wait_for(&mut events, Stage::AwaitingConfirmation));
    handle.cancel();
    let terminal = events.next().expect("terminal event");
    assert_eq!(terminal.to, Stage::Cancelled);
    assert!(!terminal.stage_completed);
    match &terminal.delta {
        StageDelta::Cancelled { rejected } => assert_eq!(rejected.len(), intents.len()),
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert!(events.next().is_none());

    let outcome = handle.result().expect("outcome");
    assert_eq!(outcome.final_stage, Stage::Cancelled);
    assert!(outcome
        .intents
        .iter()
        .all(|intent| intent.status() == IntentStatus::Rejected));
    assert_eq!(executor.call_count(), 0);
}

#[test]
fn orchestration_engine_module_retries_transient_fetch_failures() {
    let mut settings = Settings::default();
    settings.retry.initial_backoff_ms = 1;
    settings.retry.max_backoff_ms = 5;
    let executor = Arc::new(RecordingExecutor::new());
    let loader = Arc::new(FlakyLoader::new(
        2,
        FetchError::Unavailable("backend restarting".to_string()),
    ));
    let orchestrator = orchestrator(
        loader.clone(),
        Arc::new(ScriptedReasoner::proposing(review())),
        executor,
        settings,
    );
    let mut handle = orchestrator
        .start_run(request("Design review with al and bo"), options())
        .expect("start run");
    let mut events = handle.subscribe().expect("subscribe");

    let loaded = wait_for(&mut events, Stage::Proposing);
    assert!(matches!(
        loaded.delta,
        StageDelta::SnapshotLoaded {
            fetch_attempts: 3,
            ..
        }
    ));
    let outcome = handle.result().expect("outcome");
    assert_eq!(outcome.fetch_attempts, 3);
    assert_eq!(loader.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn orchestration_engine_module_malformed_calendar_fails_without_retry() {
    let executor = Arc::new(RecordingExecutor::new());
    let loader = Arc::new(FlakyLoader::new(
        usize::MAX,
        FetchError::Malformed("event without an end".to_string()),
    ));
    let reasoner = Arc::new(ScriptedReasoner::proposing(review()));
    let orchestrator = orchestrator(loader.clone(), reasoner.clone(), executor, Settings::default());
    let outcome = orchestrator
        .start_run(request("Design review with al and bo"), options())
        .expect("start run")
        .result()
        .expect("outcome");

    assert_eq!(outcome.final_stage, Stage::Failed);
    assert_eq!(outcome.error.expect("error").kind, ErrorKind::Fetch);
    assert_eq!(outcome.fetch_attempts, 1);
    assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    assert_eq!(reasoner.calls(), 0);
}

#[test]
fn orchestration_engine_module_reasoner_error_fails_the_run() {
    let executor = Arc::new(RecordingExecutor::new());
    let orchestrator = orchestrator(
        Arc::new(StaticSnapshotLoader::new(Vec::new())),
        Arc::new(ScriptedReasoner::failing(ReasonerError::Unavailable(
            "model offline".to_string(),
        ))),
        executor.clone(),
        Settings::default(),
    );
    let outcome = orchestrator
        .start_run(request("Design review with al and bo"), options())
        .expect("start run")
        .result()
        .expect("outcome");

    assert_eq!(outcome.final_stage, Stage::Failed);
    let error = outcome.error.expect("error");
    assert_eq!(error.kind, ErrorKind::Reasoner);
    assert!(error.message.contains("model offline"));
    assert_eq!(outcome.log.last().expect("last").from, Stage::Proposing);
    assert!(outcome.candidate.is_none());
    assert_eq!(executor.call_count(), 0);
}

#[test]
fn orchestration_engine_module_candidate_missing_requested_attendee_is_malformed() {
    let mut proposal = review();
    proposal.attendees = attendee_set(["al@example.com"]).expect("attendees");
    let orchestrator = orchestrator(
        Arc::new(StaticSnapshotLoader::new(Vec::new())),
        Arc::new(ScriptedReasoner::proposing(proposal)),
        Arc::new(RecordingExecutor::new()),
        Settings::default(),
    );
    let outcome = orchestrator
        .start_run(request("Design review with al and bo"), options())
        .expect("start run")
        .result()
        .expect("outcome");

    assert_eq!(outcome.final_stage, Stage::Failed);
    assert_eq!(outcome.error.expect("error").kind, ErrorKind::Reasoner);
}

#[test]
fn orchestration_engine_module_journal_records_progress_and_outcome() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = Settings {
        state_root: Some(dir.path().to_path_buf()),
        ..Settings::default()
    };
    let executor = Arc::new(RecordingExecutor::new());
    let orchestrator = orchestrator(
        Arc::new(StaticSnapshotLoader::new(Vec::new())),
        Arc::new(ScriptedReasoner::proposing(review())),
        executor,
        settings,
    );
    let mut handle = orchestrator
        .start_run(request("Design review with al and bo"), options())
        .expect("start run");
    let run_id = handle.run_id().clone();
    let mut events = handle.subscribe().expect("subscribe");
    let intents = drafted_intents(&wait_for(&mut events, Stage::AwaitingConfirmation));
    for intent in &intents {
        handle.confirm(&intent.id).expect("confirm");
    }
    let outcome = handle.result().expect("outcome");

    let stored = load_outcome(dir.path(), &run_id).expect("stored outcome");
    assert_eq!(stored.final_stage, Stage::Completed);
    assert_eq!(stored.intents.len(), outcome.intents.len());
    let progress = load_progress(dir.path(), &run_id).expect("progress");
    assert_eq!(progress.to, Stage::Completed);
    assert_eq!(progress.sequence, outcome.log.len() as u64);

    let log = std::fs::read_to_string(chronos_log_path(dir.path())).expect("log");
    assert!(log.contains(&format!("run_id={run_id}")));
    assert!(log.contains("event=stage_transition"));
    assert!(log.contains("event=run_finished"));
    assert!(outcome.diagnostics.is_empty());
}

#[test]
fn orchestration_engine_module_events_have_a_single_subscriber() {
    let executor = Arc::new(RecordingExecutor::new());
    let orchestrator = static_orchestrator(Vec::new(), executor);
    let mut handle = orchestrator
        .start_run(request("Design review with al and bo"), options())
        .expect("start run");

    let mut events = handle.subscribe().expect("first subscribe");
    assert!(matches!(
        handle.subscribe(),
        Err(OrchestratorError::AlreadySubscribed)
    ));
    let first = events.next().expect("first event");
    assert_eq!(first.sequence, 1);
    assert_eq!(first.from, Stage::Init);
    assert_eq!(first.to, Stage::Analyzing);

    let outcome = handle.result().expect("outcome");
    assert_eq!(outcome.final_stage, Stage::Cancelled);
}

#[test]
fn orchestration_engine_module_rejects_invalid_run_options() {
    let orchestrator = static_orchestrator(Vec::new(), Arc::new(RecordingExecutor::new()));
    let err = orchestrator
        .start_run(
            request("Design review"),
            RunOptions {
                stage_timeout: Duration::ZERO,
                ..options()
            },
        )
        .expect_err("zero timeout");
    assert!(matches!(err, OrchestratorError::Config(_)));
}

#[test]
fn orchestration_engine_module_confirmation_timeout_fails_the_run() {
    let executor = Arc::new(RecordingExecutor::new());
    let orchestrator = static_orchestrator(Vec::new(), executor.clone());
    let mut handle = orchestrator
        .start_run(
            request("Design review with al and bo"),
            RunOptions {
                confirmation_timeout: Some(Duration::from_millis(100)),
                ..options()
            },
        )
        .expect("start run");
    let mut events = handle.subscribe().expect("subscribe");
    let failed = wait_for_terminal(&mut events);

    assert_eq!(failed.to, Stage::Failed);
    assert_eq!(failed.from, Stage::AwaitingConfirmation);
    assert!(matches!(
        failed.delta,
        StageDelta::Failed {
            kind: ErrorKind::Timeout,
            ..
        }
    ));
    let outcome = handle.result().expect("outcome");
    assert!(outcome
        .intents
        .iter()
        .all(|intent| intent.status() == IntentStatus::Rejected));
    assert_eq!(executor.call_count(), 0);
}

fn wait_for_terminal(events: &mut StageEvents) -> StageEvent {
    events
        .find(StageEvent::is_terminal)
        .expect("terminal event")
}

#[test]
fn orchestration_engine_module_rejected_intent_is_never_submitted() {
    let executor = Arc::new(RecordingExecutor::new());
    let orchestrator = orchestrator(
        Arc::new(StaticSnapshotLoader::new(Vec::new())),
        Arc::new(
            ScriptedReasoner::proposing(review())
                .with_draft("Design review", "Does 14:00 work for both of you?"),
        ),
        executor.clone(),
        Settings::default(),
    );
    let mut handle = orchestrator
        .start_run(request("Design review with al and bo"), options())
        .expect("start run");
    let mut events = handle.subscribe().expect("subscribe");
    let intents = drafted_intents(&wait_for(&mut events, Stage::AwaitingConfirmation));

    for intent in &intents {
        if intent.category == IntentCategory::Message {
            handle.reject(&intent.id).expect("reject message");
        } else {
            handle.confirm(&intent.id).expect("confirm write");
        }
    }
    let outcome = handle.result().expect("outcome");

    assert_eq!(outcome.final_stage, Stage::Completed);
    let messages = outcome
        .intents_in(IntentCategory::Message)
        .collect::<Vec<_>>();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status(), IntentStatus::Rejected);
    assert!(matches!(
        &messages[0].payload,
        IntentPayload::Message { body, .. } if body.contains("14:00")
    ));
    assert_eq!(executor.call_count(), 1);
    assert!(outcome.submissions.iter().all(|record| record.result.is_success()));
}

#[test]
fn orchestration_engine_module_draft_failure_fails_in_drafting() {
    let executor = Arc::new(RecordingExecutor::new());
    let orchestrator = orchestrator(
        Arc::new(StaticSnapshotLoader::new(Vec::new())),
        Arc::new(
            ScriptedReasoner::proposing(review())
                .with_draft_error(ReasonerError::Malformed("empty subject".to_string())),
        ),
        executor.clone(),
        Settings::default(),
    );
    let outcome = orchestrator
        .start_run(request("Design review with al and bo"), options())
        .expect("start run")
        .result()
        .expect("outcome");

    assert_eq!(outcome.final_stage, Stage::Failed);
    assert_eq!(outcome.error.expect("error").kind, ErrorKind::Reasoner);
    assert_eq!(outcome.log.last().expect("last").from, Stage::Drafting);
    assert!(outcome.candidate.is_some());
    assert_eq!(executor.call_count(), 0);
}

#[test]
fn orchestration_engine_module_reports_availability_in_the_configured_zone() {
    let settings: Settings = serde_yaml::from_str(
        "planner:\n  working_hours:\n    start_hour: 9\n    end_hour: 17\n    timezone: Europe/Berlin\n",
    )
    .expect("settings");
    let collaborators = Collaborators::with_working_hours(
        &settings,
        Arc::new(StaticSnapshotLoader::new(Vec::new())),
        Arc::new(ScriptedReasoner::proposing(review())),
        Arc::new(RecordingExecutor::new()),
    )
    .expect("collaborators");
    let orchestrator = Orchestrator::new(collaborators, settings);
    let mut handle = orchestrator
        .start_run(
            request("Design review with al and bo"),
            orchestrator.default_options(),
        )
        .expect("start run");
    let mut events = handle.subscribe().expect("subscribe");
    wait_for(&mut events, Stage::AwaitingConfirmation);
    handle.cancel();
    let outcome = handle.result().expect("outcome");

    let availability = outcome.availability.expect("availability");
    assert_eq!(availability.timezone, "Europe/Berlin");
    assert!(availability.working_minutes() > 0);
    assert_eq!(outcome.final_stage, Stage::Cancelled);
}

#[test]
fn orchestration_engine_module_attendee_from_an_unrelated_event_is_rejected() {
    let board_prep = Event {
        id: EventId::parse("evt-board").expect("event id"),
        title: "Board prep".to_string(),
        start: at(9, 0),
        end: at(10, 0),
        attendees: attendee_set(["ceo@example.com"]).expect("attendees"),
        priority: Priority::High,
        mutable: false,
        resource: None,
    };
    let widened = Candidate {
        attendees: attendee_set(["al@example.com", "bo@example.com", "ceo@example.com"])
            .expect("attendees"),
        ..review()
    };
    let executor = Arc::new(RecordingExecutor::new());
    let orchestrator = orchestrator(
        Arc::new(StaticSnapshotLoader::new(vec![board_prep])),
        Arc::new(ScriptedReasoner::proposing(widened)),
        executor.clone(),
        Settings::default(),
    );
    let mut handle = orchestrator
        .start_run(request("Design review with al and bo"), options())
        .expect("start run");
    let mut events = handle.subscribe().expect("subscribe");

    let intents = drafted_intents(&wait_for(&mut events, Stage::AwaitingConfirmation));
    assert!(!intents.is_empty());
    for intent in &intents {
        let err = handle.confirm(&intent.id).expect_err("outsider target");
        assert!(matches!(
            err,
            OrchestratorError::Gate(GateRejection::TargetsOutsideAllowList { ref attendees, .. })
                if attendees == &vec!["ceo@example.com".to_string()]
        ));
    }
    let outcome = handle.result().expect("outcome");

    assert_eq!(outcome.gate_rejections.len(), intents.len());
    assert!(outcome
        .intents
        .iter()
        .all(|intent| intent.status() == IntentStatus::Rejected));
    let allow_list = outcome.allow_list.expect("allow list");
    assert!(allow_list
        .iter()
        .all(|attendee| attendee.as_str() != "ceo@example.com"));
    assert_eq!(executor.call_count(), 0);
}

#[test]
fn orchestration_engine_module_execution_timeout_waits_for_started_submissions() {
    let executor = Arc::new(SlowExecutor::new(Duration::from_millis(500)));
    let orchestrator = orchestrator(
        Arc::new(StaticSnapshotLoader::new(Vec::new())),
        Arc::new(ScriptedReasoner::proposing(review())),
        executor.clone(),
        Settings::default(),
    );
    let mut handle = orchestrator
        .start_run(
            request("Design review with al and bo"),
            RunOptions {
                stage_timeout: Duration::from_millis(150),
                ..options()
            },
        )
        .expect("start run");
    let mut events = handle.subscribe().expect("subscribe");

    let intents = drafted_intents(&wait_for(&mut events, Stage::AwaitingConfirmation));
    assert_eq!(intents.len(), 2);
    for intent in &intents {
        handle.confirm(&intent.id).expect("confirm");
    }
    let outcome = handle.result().expect("outcome");

    assert_eq!(outcome.final_stage, Stage::Failed);
    assert_eq!(outcome.error.as_ref().expect("error").kind, ErrorKind::Timeout);
    assert_eq!(outcome.log.last().expect("last").from, Stage::Executing);

    let applied = executor.inner.executed();
    assert_eq!(applied.len(), 1);
    assert_eq!(outcome.receipts.len(), 1);
    assert_eq!(outcome.receipts[0].intent_id, applied[0].id);
    assert_eq!(outcome.intent_status(&applied[0].id), Some(IntentStatus::Executed));
    let unstarted = intents
        .iter()
        .find(|intent| intent.id != applied[0].id)
        .expect("unstarted intent");
    assert_eq!(outcome.intent_status(&unstarted.id), Some(IntentStatus::Confirmed));
    assert!(outcome
        .submissions
        .iter()
        .all(|record| record.intent_id != unstarted.id));

    thread::sleep(Duration::from_millis(600));
    assert_eq!(executor.inner.call_count(), 1);
}

#[test]
fn orchestration_engine_module_cancel_never_interrupts_a_validated_submission() {
    let executor = Arc::new(SlowExecutor::new(Duration::from_millis(400)));
    let orchestrator = orchestrator(
        Arc::new(StaticSnapshotLoader::new(Vec::new())),
        Arc::new(ScriptedReasoner::proposing(review())),
        executor.clone(),
        Settings::default(),
    );
    let mut handle = orchestrator
        .start_run(request("Design review with al and bo"), options())
        .expect("start run");
    let mut events = handle.subscribe().expect("subscribe");

    let intents = drafted_intents(&wait_for(&mut events, Stage::AwaitingConfirmation));
    assert_eq!(intents.len(), 2);
    for intent in &intents {
        handle.confirm(&intent.id).expect("confirm");
    }
    wait_for(&mut events, Stage::Executing);
    thread::sleep(Duration::from_millis(100));
    handle.cancel();
    let outcome = handle.result().expect("outcome");

    assert_eq!(outcome.final_stage, Stage::Cancelled);
    let applied = executor.inner.executed();
    assert_eq!(applied.len(), 1);
    let in_flight = &applied[0].id;
    assert_eq!(outcome.intent_status(in_flight), Some(IntentStatus::Executed));
    assert_eq!(outcome.receipts.len(), 1);
    assert_eq!(&outcome.receipts[0].intent_id, in_flight);

    let queued = intents
        .iter()
        .find(|intent| &intent.id != in_flight)
        .expect("queued intent");
    assert_eq!(outcome.intent_status(&queued.id), Some(IntentStatus::Confirmed));
    let queued_result = outcome
        .submissions
        .iter()
        .find(|record| record.intent_id == queued.id)
        .map(|record| record.result.clone());
    assert_eq!(queued_result, Some(GateResult::Skipped));
}
