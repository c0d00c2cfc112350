use crate::calendar::analysis::{analyze_snapshot, AnalysisParams};
use crate::calendar::availability::{
    parse_iana_timezone, AvailabilityProbe, WorkingHours, WorkingHoursProbe,
};
use crate::calendar::conflict::detect_conflicts;
use crate::calendar::format::candidate_details;
use crate::calendar::loader::{load_with_retry, RetryPolicy, SnapshotLoader};
use crate::calendar::model::{Attendee, CalendarSnapshot, Candidate, Request, TimeWindow};
use crate::calendar::resolution::{plan_resolutions, PlannerParams, ResolutionAction, ResolutionOption};
use crate::config::{ConfigError, Settings};
use crate::gate::dispatch::{dispatch_all, Dispatched};
use crate::gate::{
    ActionGate, ActionIntent, AllowList, ConfirmationSource, ExecutionError, Executor,
    GateRejection, GateResult, IntentPayload, IntentRecord, IntentStatus,
};
use crate::orchestration::error::{OrchestratorError, RunError};
use crate::orchestration::handle::{Command, RunHandle};
use crate::orchestration::journal::RunJournal;
use crate::orchestration::outcome::{RunOutcome, SubmissionRecord};
use crate::orchestration::progress::{StageDelta, StageEvent};
use crate::orchestration::run_state::RunState;
use crate::orchestration::stage::{Stage, Trigger};
use crate::reasoner::{
    accept_candidate, accept_draft, Reasoner, ReasonerError, ReasoningContext, ReasoningPurpose,
};
use crate::shared::ids::{generate_run_id, IntentId, RunId};
use chrono::Utc;
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const ENGINE_POLL: Duration = Duration::from_millis(25);

#[derive(Clone)]
pub struct Collaborators {
    pub loader: Arc<dyn SnapshotLoader>,
    pub availability: Arc<dyn AvailabilityProbe>,
    pub reasoner: Arc<dyn Reasoner>,
    pub executor: Arc<dyn Executor>,
}

impl Collaborators {
    pub fn new(
        loader: Arc<dyn SnapshotLoader>,
        availability: Arc<dyn AvailabilityProbe>,
        reasoner: Arc<dyn Reasoner>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            loader,
            availability,
            reasoner,
            executor,
        }
    }

    pub fn with_working_hours(
        settings: &Settings,
        loader: Arc<dyn SnapshotLoader>,
        reasoner: Arc<dyn Reasoner>,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, ConfigError> {
        let probe = WorkingHoursProbe::new(settings.availability_hours()?);
        Ok(Self::new(loader, Arc::new(probe), reasoner, executor))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub auto_confirm_low_risk: bool,
    pub dry_run: bool,
    pub stage_timeout: Duration,
    pub search_window: Duration,
    pub interactive_resolution: bool,
    pub confirmation_timeout: Option<Duration>,
}

impl RunOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let defaults = &settings.run_defaults;
        Self {
            auto_confirm_low_risk: defaults.auto_confirm_low_risk,
            dry_run: defaults.dry_run,
            stage_timeout: Duration::from_millis(defaults.stage_timeout_ms),
            search_window: Duration::from_secs(u64::from(defaults.search_window_minutes) * 60),
            interactive_resolution: defaults.interactive_resolution,
            confirmation_timeout: defaults.confirmation_timeout_ms.map(Duration::from_millis),
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    collaborators: Collaborators,
    settings: Settings,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, settings: Settings) -> Self {
        Self {
            collaborators,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn default_options(&self) -> RunOptions {
        RunOptions::from_settings(&self.settings)
    }

    pub fn start_run(
        &self,
        request: Request,
        options: RunOptions,
    ) -> Result<RunHandle, OrchestratorError> {
        self.settings.validate()?;
        let plan = RunPlan::resolve(&self.settings, options)?;
        let run_id = generate_run_id(Utc::now().timestamp()).map_err(|reason| {
            OrchestratorError::Start {
                what: "run id".to_string(),
                reason,
            }
        })?;

        let cancel = Arc::new(AtomicBool::new(false));
        let (events_tx, events_rx) = mpsc::channel::<StageEvent>();
        let (control_tx, control_rx) = mpsc::channel::<Command>();
        let engine = Engine {
            run_id: run_id.clone(),
            plan,
            collaborators: self.collaborators.clone(),
            cancel: Arc::clone(&cancel),
            events: events_tx,
            control: control_rx,
            deferred: VecDeque::new(),
            journal: RunJournal::new(self.settings.state_root.clone(), run_id.clone()),
        };
        let join = thread::Builder::new()
            .name(format!("chronos-{run_id}"))
            .spawn(move || engine.run(request))
            .map_err(|err| OrchestratorError::Start {
                what: "engine thread".to_string(),
                reason: err.to_string(),
            })?;
        Ok(RunHandle::new(run_id, control_tx, events_rx, cancel, join))
    }
}

struct RunPlan {
    options: RunOptions,
    search_window: chrono::Duration,
    horizon: chrono::Duration,
    slot_step: chrono::Duration,
    max_shift_options: usize,
    working_hours: Option<WorkingHours>,
    analysis: AnalysisParams,
    retry: RetryPolicy,
    max_concurrency: usize,
}

impl RunPlan {
    fn resolve(settings: &Settings, options: RunOptions) -> Result<Self, OrchestratorError> {
        if options.stage_timeout.is_zero() {
            return Err(ConfigError::Settings("`stage_timeout` must be > 0".to_string()).into());
        }
        if options.confirmation_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(
                ConfigError::Settings("`confirmation_timeout` must be > 0 when set".to_string())
                    .into(),
            );
        }
        let search_window = chrono::Duration::from_std(options.search_window)
            .ok()
            .filter(|window| *window > chrono::Duration::zero())
            .ok_or_else(|| {
                ConfigError::Settings("`search_window` must be > 0 and in range".to_string())
            })?;
        Ok(Self {
            search_window,
            horizon: settings.snapshot_horizon(),
            slot_step: chrono::Duration::minutes(i64::from(settings.planner.slot_step_minutes)),
            max_shift_options: settings.planner.max_shift_options,
            working_hours: settings.planner_working_hours()?,
            analysis: settings.analysis_params(),
            retry: settings.retry_policy(),
            max_concurrency: settings.execution.max_concurrency,
            options,
        })
    }

    fn stage_timeout_ms(&self) -> u64 {
        millis(self.options.stage_timeout)
    }

    fn stage_deadline(&self) -> Instant {
        Instant::now() + self.options.stage_timeout
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

enum Halt {
    Failed(OrchestratorError),
    Cancelled,
}

impl From<OrchestratorError> for Halt {
    fn from(err: OrchestratorError) -> Self {
        Halt::Failed(err)
    }
}

enum Interrupt {
    TimedOut,
    Cancelled,
    Panicked,
}

struct Engine {
    run_id: RunId,
    plan: RunPlan,
    collaborators: Collaborators,
    cancel: Arc<AtomicBool>,
    events: Sender<StageEvent>,
    control: Receiver<Command>,
    deferred: VecDeque<Command>,
    journal: RunJournal,
}

impl Engine {
    fn run(mut self, request: Request) -> RunOutcome {
        let mut state = RunState::new(self.run_id.clone(), request, Utc::now());
        if let Err(halt) = self.drive(&mut state) {
            self.halt(&mut state, halt);
        }
        self.finish(state)
    }

    fn drive(&mut self, state: &mut RunState) -> Result<(), Halt> {
        let request = state.request.clone();
        self.advance(state, Trigger::Start, StageDelta::Started { request })?;
        self.analyze(state)?;
        self.propose(state)?;
        if self.check_conflicts(state)? {
            self.resolve(state)?;
        }
        self.draft(state)?;
        self.await_confirmation(state)?;
        self.execute(state)
    }

    fn analyze(&mut self, state: &mut RunState) -> Result<(), Halt> {
        self.checkpoint()?;
        let reference = state.request.reference_time;
        let window = TimeWindow::new(
            reference - self.plan.search_window,
            reference + self.plan.horizon + self.plan.search_window,
        )
        .map_err(|reason| OrchestratorError::Config(ConfigError::Settings(reason)))?;
        let deadline = self.plan.stage_deadline();

        let loader = Arc::clone(&self.collaborators.loader);
        let retry = self.plan.retry;
        let cancel = Arc::clone(&self.cancel);
        let snapshot_rx = spawn_call("snapshot", move || {
            let mut retries = Vec::new();
            let loaded = load_with_retry(
                loader.as_ref(),
                window,
                &retry,
                &cancel,
                Some(deadline),
                |attempt| retries.push(attempt.clone()),
            );
            (loaded, retries)
        })?;
        let probe = Arc::clone(&self.collaborators.availability);
        let probe_request = state.request.clone();
        let availability_rx = spawn_call("availability", move || {
            probe.check(&probe_request, window)
        })?;

        let (loaded, retries) = self
            .wait_call(&snapshot_rx, deadline)
            .map_err(|interrupt| self.interrupted(interrupt, Stage::Analyzing, "snapshot loader"))?;
        state.fetch_attempts = u32::try_from(retries.len()).unwrap_or(u32::MAX).saturating_add(1);
        for attempt in &retries {
            let number = attempt.attempt.to_string();
            let backoff = millis(attempt.backoff).to_string();
            let error = attempt.error.to_string();
            self.log(
                state,
                "fetch_retry",
                &[
                    ("attempt", number.as_str()),
                    ("backoff_ms", backoff.as_str()),
                    ("error", error.as_str()),
                ],
            );
        }
        let snapshot = Arc::new(loaded.map_err(OrchestratorError::from)?);
        let availability = self
            .wait_call(&availability_rx, deadline)
            .map_err(|interrupt| self.interrupted(interrupt, Stage::Analyzing, "availability probe"))?
            .map_err(OrchestratorError::from)?;

        let analysis = analyze_snapshot(&snapshot, &self.plan.analysis);
        let advisories = analysis.advisories.len().to_string();
        self.log(state, "calendar_analyzed", &[("advisories", advisories.as_str())]);

        let delta = StageDelta::SnapshotLoaded {
            event_count: snapshot.events().len(),
            fetch_attempts: state.fetch_attempts,
            analysis: analysis.clone(),
            availability: Some(availability.clone()),
        };
        state.snapshot = Some(snapshot);
        state.analysis = Some(analysis);
        state.availability = Some(availability);
        self.advance(state, Trigger::SnapshotLoaded, delta)
    }

    fn propose(&mut self, state: &mut RunState) -> Result<(), Halt> {
        self.checkpoint()?;
        let snapshot = loaded_snapshot(state)?;
        let deadline = self.plan.stage_deadline();
        let context = ReasoningContext::propose(self.run_id.clone(), state.availability.clone());
        let reasoner = Arc::clone(&self.collaborators.reasoner);
        let request = state.request.clone();
        let call_snapshot = Arc::clone(&snapshot);
        let reasoner_rx = spawn_call("reasoner", move || {
            reasoner.reason(&request, &call_snapshot, &context)
        })?;
        let output = self
            .wait_call(&reasoner_rx, deadline)
            .map_err(|interrupt| self.interrupted(interrupt, Stage::Proposing, "reasoner"))?
            .map_err(OrchestratorError::from)?;

        let candidate = accept_candidate(output, &state.request).map_err(OrchestratorError::from)?;
        let within_snapshot = candidate
            .window()
            .map(|window| snapshot.window().contains(&window))
            .unwrap_or(false);
        if !within_snapshot {
            return Err(OrchestratorError::from(ReasonerError::Malformed(
                "candidate lies outside the loaded calendar window".to_string(),
            ))
            .into());
        }

        state.candidate = Some(candidate.clone());
        self.advance(state, Trigger::CandidateProposed, StageDelta::CandidateProposed { candidate })
    }

    fn check_conflicts(&mut self, state: &mut RunState) -> Result<bool, Halt> {
        self.checkpoint()?;
        let snapshot = loaded_snapshot(state)?;
        let candidate = proposed_candidate(state)?;
        let conflicts = detect_conflicts(&candidate, &snapshot);
        if conflicts.is_empty() {
            self.advance(
                state,
                Trigger::NoConflicts,
                StageDelta::ConflictsDetected {
                    conflicts: Vec::new(),
                    options: Vec::new(),
                },
            )?;
            return Ok(false);
        }

        let params = self.planner_params(&state.request);
        let options = plan_resolutions(&candidate, &conflicts, &snapshot, &params);
        let count = conflicts.len().to_string();
        let option_count = options.len().to_string();
        self.log(
            state,
            "conflicts_detected",
            &[("conflicts", count.as_str()), ("options", option_count.as_str())],
        );
        state.conflicts = conflicts.clone();
        state.options = options.clone();
        self.advance(
            state,
            Trigger::ConflictsFound,
            StageDelta::ConflictsDetected { conflicts, options },
        )?;
        Ok(true)
    }

    fn resolve(&mut self, state: &mut RunState) -> Result<(), Halt> {
        self.checkpoint()?;
        let Some(top) = state.options.first().cloned() else {
            return Err(OrchestratorError::NoResolutionOptions {
                conflicts: state.conflicts.len(),
            }
            .into());
        };
        let selected = if self.plan.options.interactive_resolution {
            self.await_choice(state)?
        } else {
            top
        };
        let score = selected.score.to_string();
        self.log(
            state,
            "option_selected",
            &[
                ("option_id", selected.id.as_str()),
                ("strategy", selected.strategy().as_str()),
                ("score", score.as_str()),
            ],
        );
        state.selected_option = Some(selected.clone());
        self.advance(state, Trigger::OptionSelected, StageDelta::OptionSelected { option: selected })
    }

    fn await_choice(&mut self, state: &mut RunState) -> Result<ResolutionOption, Halt> {
        let deadline = self
            .plan
            .options
            .confirmation_timeout
            .map(|timeout| Instant::now() + timeout);
        loop {
            self.checkpoint()?;
            self.check_wait_deadline(deadline, Stage::Resolving)?;
            match self.next_command(deadline)? {
                Some(Command::ChooseOption { option_id, reply }) => {
                    match state.options.iter().find(|option| option.id == option_id) {
                        Some(option) => {
                            let _ = reply.send(Ok(()));
                            return Ok(option.clone());
                        }
                        None => {
                            let _ = reply.send(Err(OrchestratorError::UnknownOption { option_id }));
                        }
                    }
                }
                Some(Command::Wake) | None => {}
                Some(other) => self.deferred.push_back(other),
            }
        }
    }

    fn draft(&mut self, state: &mut RunState) -> Result<(), Halt> {
        self.checkpoint()?;
        let deadline = self.plan.stage_deadline();
        let snapshot = loaded_snapshot(state)?;
        let selected = state.selected_option.clone();
        let candidate = match &selected {
            Some(option) => option.action.candidate().clone(),
            None => proposed_candidate(state)?,
        };
        let window = candidate
            .window()
            .map_err(|reason| OrchestratorError::from(ReasonerError::Malformed(reason)))?;
        let allow_list = AllowList::derive(&state.request, &snapshot, window);

        let mut intents = Vec::new();
        let escalated = matches!(
            selected.as_ref().map(|option| &option.action),
            Some(ResolutionAction::Escalate { .. })
        );
        if !escalated {
            intents.push(ActionIntent::draft(
                &self.run_id,
                candidate.attendees.clone(),
                IntentPayload::CreateEvent {
                    title: candidate.title.clone(),
                    start: candidate.start,
                    end: candidate.end,
                    description: None,
                    resource: candidate.resource.clone(),
                },
            ));
            if let Some(ResolutionAction::MoveExisting { moves, .. }) =
                selected.as_ref().map(|option| &option.action)
            {
                for planned in moves {
                    intents.push(ActionIntent::draft(
                        &self.run_id,
                        planned.attendees.clone(),
                        IntentPayload::MoveEvent {
                            event_id: planned.event_id.clone(),
                            title: planned.event_title.clone(),
                            new_start: planned.to.start(),
                            new_end: planned.to.end(),
                        },
                    ));
                }
            }
            if !candidate.attendees.is_empty() {
                let message = self.draft_message(state, &snapshot, &candidate, selected, deadline)?;
                intents.push(message);
            }
        }

        let allowed = allow_list.len().to_string();
        let drafted = intents.len().to_string();
        self.log(
            state,
            "intents_drafted",
            &[("intents", drafted.as_str()), ("allow_list", allowed.as_str())],
        );
        state.allow_list = Some(allow_list);
        let records: Vec<IntentRecord> = intents.iter().map(IntentRecord::from).collect();
        state.intents = intents;
        self.advance(
            state,
            Trigger::IntentsDrafted,
            StageDelta::IntentsDrafted { intents: records },
        )
    }

    fn draft_message(
        &self,
        state: &RunState,
        snapshot: &Arc<CalendarSnapshot>,
        candidate: &Candidate,
        selected: Option<ResolutionOption>,
        deadline: Instant,
    ) -> Result<ActionIntent, Halt> {
        let context = ReasoningContext {
            purpose: ReasoningPurpose::DraftMessage,
            run_id: self.run_id.clone(),
            availability: state.availability.clone(),
            candidate: Some(candidate.clone()),
            candidate_details: Some(candidate_details(candidate)),
            conflicts: state.conflicts.clone(),
            selected_option: selected,
        };
        let reasoner = Arc::clone(&self.collaborators.reasoner);
        let request = state.request.clone();
        let call_snapshot = Arc::clone(snapshot);
        let reasoner_rx = spawn_call("reasoner", move || {
            reasoner.reason(&request, &call_snapshot, &context)
        })?;
        let output = self
            .wait_call(&reasoner_rx, deadline)
            .map_err(|interrupt| self.interrupted(interrupt, Stage::Drafting, "reasoner"))?
            .map_err(OrchestratorError::from)?;
        let draft = accept_draft(output).map_err(OrchestratorError::from)?;
        Ok(ActionIntent::draft(
            &self.run_id,
            candidate.attendees.clone(),
            IntentPayload::Message {
                subject: draft.subject,
                body: draft.body,
            },
        ))
    }

    fn await_confirmation(&mut self, state: &mut RunState) -> Result<(), Halt> {
        self.checkpoint()?;
        let gate = self.gate(state);
        if self.plan.options.auto_confirm_low_risk {
            self.auto_confirm(state, &gate);
        }

        let deadline = self
            .plan
            .options
            .confirmation_timeout
            .map(|timeout| Instant::now() + timeout);
        while state.has_drafted_intents() {
            self.checkpoint()?;
            self.check_wait_deadline(deadline, Stage::AwaitingConfirmation)?;
            let command = match self.deferred.pop_front() {
                Some(command) => Some(command),
                None => self.next_command(deadline)?,
            };
            if let Some(command) = command {
                self.apply_command(state, &gate, command);
            }
        }

        let intents = state.intent_statuses();
        self.advance(state, Trigger::IntentsSettled, StageDelta::IntentsSettled { intents })
    }

    fn auto_confirm(&self, state: &mut RunState, gate: &ActionGate) {
        let eligible = state
            .intents
            .iter()
            .filter(|intent| {
                intent.status() == IntentStatus::Drafted && !intent.category.requires_confirmation()
            })
            .map(|intent| intent.id.clone())
            .collect::<Vec<_>>();
        for intent_id in eligible {
            let _ = self.confirm_intent(state, gate, &intent_id, ConfirmationSource::AutoLowRisk);
        }
    }

    fn apply_command(&self, state: &mut RunState, gate: &ActionGate, command: Command) {
        match command {
            Command::Confirm { intent_id, reply } => {
                let result = self.confirm_intent(state, gate, &intent_id, ConfirmationSource::Caller);
                let _ = reply.send(result);
            }
            Command::Reject { intent_id, reply } => {
                let result = state
                    .intent_mut(&intent_id)
                    .and_then(|intent| intent.transition(IntentStatus::Rejected).map_err(Into::into));
                if result.is_ok() {
                    self.log(state, "intent_rejected", &[("intent_id", intent_id.as_str())]);
                }
                let _ = reply.send(result);
            }
            Command::ChooseOption { reply, .. } => {
                let _ = reply.send(Err(OrchestratorError::UnexpectedCommand {
                    command: "choose_option",
                    stage: state.stage(),
                }));
            }
            Command::Wake => {}
        }
    }

    fn confirm_intent(
        &self,
        state: &mut RunState,
        gate: &ActionGate,
        intent_id: &IntentId,
        source: ConfirmationSource,
    ) -> Result<(), OrchestratorError> {
        let intent = state.intent_mut(intent_id)?;
        match gate.confirm(intent, source) {
            Ok(confirmation) => {
                state.confirmations.insert(intent_id.clone(), confirmation);
                self.log(state, "intent_confirmed", &[("intent_id", intent_id.as_str())]);
                Ok(())
            }
            Err(rejection) => {
                if !matches!(rejection, GateRejection::NotDrafted { .. }) {
                    let reason = rejection.to_string();
                    self.log(
                        state,
                        "gate_rejected",
                        &[("intent_id", intent_id.as_str()), ("reason", reason.as_str())],
                    );
                    state.gate_rejections.push(rejection.clone());
                }
                Err(rejection.into())
            }
        }
    }

    fn execute(&mut self, state: &mut RunState) -> Result<(), Halt> {
        self.checkpoint()?;
        let gate = Arc::new(self.gate(state));
        let items = state
            .intents
            .iter()
            .filter(|intent| intent.status() == IntentStatus::Confirmed)
            .filter_map(|intent| {
                state
                    .confirmations
                    .get(&intent.id)
                    .map(|confirmation| (intent.targets.clone(), (intent.clone(), confirmation.clone())))
            })
            .collect::<Vec<(BTreeSet<Attendee>, _)>>();
        let submitted = items
            .iter()
            .map(|(_, (intent, _))| (intent.id.clone(), intent.category))
            .collect::<Vec<_>>();

        let executor = Arc::clone(&self.collaborators.executor);
        let cancel = Arc::clone(&self.cancel);
        let results = dispatch_all(
            items,
            self.plan.max_concurrency,
            Some(self.plan.stage_deadline()),
            move |(mut intent, confirmation)| {
                let result = gate.submit(&mut intent, Some(&confirmation), executor.as_ref(), &cancel);
                (intent, result)
            },
        );

        let mut failure: Option<ExecutionError> = None;
        let mut timed_out = false;
        let mut skipped = false;
        for ((intent_id, category), dispatched) in submitted.into_iter().zip(results) {
            let result = match dispatched {
                Dispatched::Done((intent, result)) => {
                    state.replace_intent(intent);
                    result
                }
                Dispatched::Panicked => GateResult::Failed {
                    error: ExecutionError::Panicked {
                        intent_id: intent_id.clone(),
                    },
                },
                Dispatched::TimedOut => {
                    timed_out = true;
                    continue;
                }
            };
            match &result {
                GateResult::Rejected { rejection } => state.gate_rejections.push(rejection.clone()),
                GateResult::Failed { error } if failure.is_none() => failure = Some(error.clone()),
                GateResult::Skipped => skipped = true,
                _ => {}
            }
            self.log(
                state,
                "gate_submitted",
                &[("intent_id", intent_id.as_str()), ("result", result.as_str())],
            );
            state.submissions.push(SubmissionRecord {
                intent_id,
                category,
                result,
            });
        }

        if timed_out {
            return Err(OrchestratorError::Timeout {
                stage: Stage::Executing,
                timeout_ms: self.plan.stage_timeout_ms(),
            }
            .into());
        }
        if let Some(error) = failure {
            return Err(OrchestratorError::Execution(error).into());
        }
        if skipped {
            return Err(Halt::Cancelled);
        }
        let submissions = state.submissions.clone();
        self.advance(state, Trigger::ExecutionSettled, StageDelta::ExecutionSettled { submissions })
    }

    fn gate(&self, state: &RunState) -> ActionGate {
        ActionGate::new(state.allow_list.clone().unwrap_or_default(), self.plan.options.dry_run)
    }

    fn planner_params(&self, request: &Request) -> PlannerParams {
        let working_hours = self.plan.working_hours.map(|hours| {
            match request
                .constraints
                .timezone
                .as_deref()
                .and_then(|raw| parse_iana_timezone(raw).ok())
            {
                Some(timezone) => hours.with_timezone(timezone),
                None => hours,
            }
        });
        PlannerParams {
            search_window: self.plan.search_window,
            slot_step: self.plan.slot_step,
            max_shift_options: self.plan.max_shift_options,
            not_before: Some(request.reference_time),
            working_hours,
        }
    }

    fn checkpoint(&self) -> Result<(), Halt> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(Halt::Cancelled);
        }
        Ok(())
    }

    fn check_wait_deadline(&self, deadline: Option<Instant>, stage: Stage) -> Result<(), Halt> {
        match deadline {
            Some(limit) if Instant::now() >= limit => Err(OrchestratorError::Timeout {
                stage,
                timeout_ms: self
                    .plan
                    .options
                    .confirmation_timeout
                    .map(millis)
                    .unwrap_or_default(),
            }
            .into()),
            _ => Ok(()),
        }
    }

    fn next_command(&mut self, deadline: Option<Instant>) -> Result<Option<Command>, Halt> {
        let wait = deadline
            .map(|limit| limit.saturating_duration_since(Instant::now()).min(ENGINE_POLL))
            .unwrap_or(ENGINE_POLL);
        match self.control.recv_timeout(wait) {
            Ok(command) => Ok(Some(command)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Halt::Cancelled),
        }
    }

    fn wait_call<R>(&self, rx: &Receiver<R>, deadline: Instant) -> Result<R, Interrupt> {
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(Interrupt::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Interrupt::TimedOut);
            }
            match rx.recv_timeout((deadline - now).min(ENGINE_POLL)) {
                Ok(value) => return Ok(value),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(Interrupt::Panicked),
            }
        }
    }

    fn interrupted(&self, interrupt: Interrupt, stage: Stage, collaborator: &'static str) -> Halt {
        match interrupt {
            Interrupt::TimedOut => Halt::Failed(OrchestratorError::Timeout {
                stage,
                timeout_ms: self.plan.stage_timeout_ms(),
            }),
            Interrupt::Cancelled => Halt::Cancelled,
            Interrupt::Panicked => {
                Halt::Failed(OrchestratorError::CollaboratorPanicked { collaborator, stage })
            }
        }
    }

    fn advance(&self, state: &mut RunState, trigger: Trigger, delta: StageDelta) -> Result<(), Halt> {
        let event = state.advance(trigger, true, delta)?;
        self.publish(state, event);
        Ok(())
    }

    fn halt(&self, state: &mut RunState, halt: Halt) {
        let (trigger, delta) = match halt {
            Halt::Failed(error) => {
                let record = RunError::from(&error);
                let rejected = state.reject_drafted();
                if !rejected.is_empty() {
                    let count = rejected.len().to_string();
                    self.log(state, "drafted_intents_rejected", &[("count", count.as_str())]);
                }
                state.error = Some(record.clone());
                (
                    Trigger::Fail,
                    StageDelta::Failed {
                        kind: record.kind,
                        message: record.message,
                    },
                )
            }
            Halt::Cancelled => {
                let rejected = state.reject_drafted();
                (Trigger::Cancel, StageDelta::Cancelled { rejected })
            }
        };
        match state.advance(trigger, false, delta) {
            Ok(event) => self.publish(state, event),
            Err(err) => state.diagnostics.push(err.to_string()),
        }
    }

    fn finish(mut self, state: RunState) -> RunOutcome {
        let mut outcome = RunOutcome::from_state(state, Utc::now());
        if let Err(err) = self.journal.record_outcome(&outcome) {
            outcome.diagnostics.push(format!("journal: {err}"));
        }
        let pending = self
            .deferred
            .drain(..)
            .chain(self.control.try_iter())
            .collect::<Vec<_>>();
        for command in pending {
            command.reply_finished(&self.run_id);
        }
        outcome
    }

    fn publish(&self, state: &mut RunState, event: StageEvent) {
        if let Err(err) = self.journal.record_event(&event) {
            state.diagnostics.push(format!("journal: {err}"));
        }
        let _ = self.events.send(event);
    }

    fn log(&self, state: &mut RunState, event: &str, fields: &[(&str, &str)]) {
        if !self.journal.is_enabled() {
            return;
        }
        if let Err(err) = self.journal.log(event, fields) {
            state.diagnostics.push(format!("log: {err}"));
        }
    }
}

fn loaded_snapshot(state: &RunState) -> Result<Arc<CalendarSnapshot>, Halt> {
    state.snapshot.clone().ok_or_else(|| {
        Halt::Failed(OrchestratorError::InvalidTransition {
            from: state.stage(),
            to: Stage::Analyzing,
        })
    })
}

fn proposed_candidate(state: &RunState) -> Result<Candidate, Halt> {
    state.candidate.clone().ok_or_else(|| {
        Halt::Failed(OrchestratorError::InvalidTransition {
            from: state.stage(),
            to: Stage::Proposing,
        })
    })
}

fn spawn_call<R, F>(name: &str, work: F) -> Result<Receiver<R>, OrchestratorError>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("chronos-{name}"))
        .spawn(move || {
            let _ = tx.send(work());
        })
        .map_err(|err| OrchestratorError::Start {
            what: format!("{name} worker"),
            reason: err.to_string(),
        })?;
    Ok(rx)
}
