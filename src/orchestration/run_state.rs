use crate::calendar::analysis::CalendarAnalysis;
use crate::calendar::availability::AvailabilityReport;
use crate::calendar::conflict::Conflict;
use crate::calendar::model::{CalendarSnapshot, Candidate, Request};
use crate::calendar::resolution::ResolutionOption;
use crate::gate::{ActionIntent, AllowList, Confirmation, GateRejection, IntentStatus};
use crate::orchestration::error::{OrchestratorError, RunError};
use crate::orchestration::outcome::SubmissionRecord;
use crate::orchestration::progress::{IntentStatusEntry, StageDelta, StageEvent};
use crate::orchestration::stage::{Stage, Trigger};
use crate::shared::ids::{IntentId, RunId};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug)]
pub struct RunState {
    run_id: RunId,
    stage: Stage,
    started_at: DateTime<Utc>,
    log: Vec<StageEvent>,
    pub request: Request,
    pub snapshot: Option<Arc<CalendarSnapshot>>,
    pub fetch_attempts: u32,
    pub availability: Option<AvailabilityReport>,
    pub analysis: Option<CalendarAnalysis>,
    pub candidate: Option<Candidate>,
    pub conflicts: Vec<Conflict>,
    pub options: Vec<ResolutionOption>,
    pub selected_option: Option<ResolutionOption>,
    pub allow_list: Option<AllowList>,
    pub intents: Vec<ActionIntent>,
    pub confirmations: BTreeMap<IntentId, Confirmation>,
    pub submissions: Vec<SubmissionRecord>,
    pub gate_rejections: Vec<GateRejection>,
    pub error: Option<RunError>,
    pub diagnostics: Vec<String>,
}

impl RunState {
    pub fn new(run_id: RunId, request: Request, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            stage: Stage::Init,
            started_at,
            log: Vec::new(),
            request,
            snapshot: None,
            fetch_attempts: 0,
            availability: None,
            analysis: None,
            candidate: None,
            conflicts: Vec::new(),
            options: Vec::new(),
            selected_option: None,
            allow_list: None,
            intents: Vec::new(),
            confirmations: BTreeMap::new(),
            submissions: Vec::new(),
            gate_rejections: Vec::new(),
            error: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn log(&self) -> &[StageEvent] {
        &self.log
    }

    pub fn advance(
        &mut self,
        trigger: Trigger,
        stage_completed: bool,
        delta: StageDelta,
    ) -> Result<StageEvent, OrchestratorError> {
        let from = self.stage;
        let to = match from.next(trigger) {
            Some(to) => to,
            None => {
                return Err(OrchestratorError::InvalidTransition {
                    from,
                    to: target_hint(trigger),
                })
            }
        };
        let event = StageEvent {
            run_id: self.run_id.clone(),
            sequence: self.log.len() as u64 + 1,
            from,
            to,
            trigger,
            at: Utc::now(),
            stage_completed,
            delta,
        };
        self.stage = to;
        self.log.push(event.clone());
        Ok(event)
    }

    pub fn intent(&self, id: &IntentId) -> Option<&ActionIntent> {
        self.intents.iter().find(|intent| &intent.id == id)
    }

    pub fn intent_mut(&mut self, id: &IntentId) -> Result<&mut ActionIntent, OrchestratorError> {
        self.intents
            .iter_mut()
            .find(|intent| &intent.id == id)
            .ok_or_else(|| OrchestratorError::UnknownIntent {
                intent_id: id.clone(),
            })
    }

    pub fn has_drafted_intents(&self) -> bool {
        self.intents
            .iter()
            .any(|intent| intent.status() == IntentStatus::Drafted)
    }

    pub fn reject_drafted(&mut self) -> Vec<IntentId> {
        let mut rejected = Vec::new();
        for intent in &mut self.intents {
            if intent.status() == IntentStatus::Drafted
                && intent.transition(IntentStatus::Rejected).is_ok()
            {
                rejected.push(intent.id.clone());
            }
        }
        rejected
    }

    pub fn intent_statuses(&self) -> Vec<IntentStatusEntry> {
        self.intents
            .iter()
            .map(|intent| IntentStatusEntry {
                intent_id: intent.id.clone(),
                status: intent.status(),
            })
            .collect()
    }

    pub fn replace_intent(&mut self, updated: ActionIntent) {
        if let Some(slot) = self.intents.iter_mut().find(|intent| intent.id == updated.id) {
            *slot = updated;
        }
    }
}

fn target_hint(trigger: Trigger) -> Stage {
    match trigger {
        Trigger::Start => Stage::Analyzing,
        Trigger::SnapshotLoaded => Stage::Proposing,
        Trigger::CandidateProposed => Stage::ConflictCheck,
        Trigger::ConflictsFound => Stage::Resolving,
        Trigger::NoConflicts | Trigger::OptionSelected => Stage::Drafting,
        Trigger::IntentsDrafted => Stage::AwaitingConfirmation,
        Trigger::IntentsSettled => Stage::Executing,
        Trigger::ExecutionSettled => Stage::Completed,
        Trigger::Fail => Stage::Failed,
        Trigger::Cancel => Stage::Cancelled,
    }
}
