use crate::calendar::analysis::CalendarAnalysis;
use crate::calendar::availability::AvailabilityReport;
use crate::calendar::conflict::Conflict;
use crate::calendar::format::{format_duration, format_instant};
use crate::calendar::model::{Candidate, Request};
use crate::calendar::resolution::ResolutionOption;
use crate::gate::{
    AllowList, DryRunEffect, ExecutionReceipt, GateRejection, GateResult,
    IntentCategory, IntentRecord, IntentStatus,
};
use crate::orchestration::error::RunError;
use crate::orchestration::progress::StageEvent;
use crate::orchestration::run_state::RunState;
use crate::orchestration::stage::Stage;
use crate::shared::ids::{IntentId, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub intent_id: IntentId,
    pub category: IntentCategory,
    pub result: GateResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub run_id: RunId,
    pub final_stage: Stage,
    pub request: Request,
    pub candidate: Option<Candidate>,
    pub proposed_candidate: Option<Candidate>,
    pub conflicts: Vec<Conflict>,
    pub options: Vec<ResolutionOption>,
    pub selected_option: Option<ResolutionOption>,
    pub allow_list: Option<AllowList>,
    pub intents: Vec<IntentRecord>,
    pub submissions: Vec<SubmissionRecord>,
    pub receipts: Vec<ExecutionReceipt>,
    pub dry_run_effects: Vec<DryRunEffect>,
    pub gate_rejections: Vec<GateRejection>,
    pub analysis: Option<CalendarAnalysis>,
    pub availability: Option<AvailabilityReport>,
    pub fetch_attempts: u32,
    pub error: Option<RunError>,
    pub summary: String,
    pub diagnostics: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub log: Vec<StageEvent>,
}

impl RunOutcome {
    pub fn from_state(state: RunState, finished_at: DateTime<Utc>) -> Self {
        let summary = render_summary(&state);
        let candidate = final_candidate(&state);
        let receipts = state
            .submissions
            .iter()
            .filter_map(|record| match &record.result {
                GateResult::Executed { receipt } => Some(receipt.clone()),
                _ => None,
            })
            .collect();
        let dry_run_effects = state
            .submissions
            .iter()
            .filter_map(|record| match &record.result {
                GateResult::DryRun { effect } => Some(effect.clone()),
                _ => None,
            })
            .collect();
        let log = state.log().to_vec();
        let run_id = state.run_id().clone();
        let final_stage = state.stage();
        let started_at = state.started_at();

        Self {
            run_id,
            final_stage,
            request: state.request,
            candidate,
            proposed_candidate: state.candidate,
            conflicts: state.conflicts,
            options: state.options,
            selected_option: state.selected_option,
            allow_list: state.allow_list,
            intents: state.intents.iter().map(IntentRecord::from).collect(),
            submissions: state.submissions,
            receipts,
            dry_run_effects,
            gate_rejections: state.gate_rejections,
            analysis: state.analysis,
            availability: state.availability,
            fetch_attempts: state.fetch_attempts,
            error: state.error,
            summary,
            diagnostics: state.diagnostics,
            started_at,
            finished_at,
            log,
        }
    }

    pub fn intent(&self, id: &IntentId) -> Option<&IntentRecord> {
        self.intents.iter().find(|intent| &intent.id == id)
    }

    pub fn intent_status(&self, id: &IntentId) -> Option<IntentStatus> {
        self.intent(id).map(IntentRecord::status)
    }

    pub fn intents_in(&self, category: IntentCategory) -> impl Iterator<Item = &IntentRecord> + '_ {
        self.intents
            .iter()
            .filter(move |intent| intent.category == category)
    }

    pub fn is_completed(&self) -> bool {
        self.final_stage == Stage::Completed
    }
}

fn final_candidate(state: &RunState) -> Option<Candidate> {
    state
        .selected_option
        .as_ref()
        .map(|option| option.action.candidate().clone())
        .or_else(|| state.candidate.clone())
}

pub fn render_summary(state: &RunState) -> String {
    let mut lines = vec![format!("Run {} {}.", state.run_id(), state.stage())];

    match final_candidate(state) {
        Some(candidate) => lines.push(format!(
            "Proposed: {} at {} for {}.",
            candidate.title,
            format_instant(candidate.start),
            format_duration(candidate.duration())
        )),
        None => lines.push("Proposed: no candidate.".to_string()),
    }

    match (&state.selected_option, state.conflicts.len()) {
        (_, 0) => lines.push("Conflicts: none.".to_string()),
        (Some(option), count) => lines.push(format!(
            "Conflicts: {count}, resolved by {} ({}).",
            option.strategy(),
            option.rationale
        )),
        (None, count) => lines.push(format!("Conflicts: {count}, unresolved.")),
    }

    let drafted_message = state
        .intents
        .iter()
        .any(|intent| intent.category == IntentCategory::Message);
    lines.push(format!(
        "Message drafted: {}.",
        if drafted_message { "yes" } else { "no" }
    ));

    if !state.intents.is_empty() {
        let count = |status: IntentStatus| {
            state
                .intents
                .iter()
                .filter(|intent| intent.status() == status)
                .count()
        };
        lines.push(format!(
            "Intents: {} drafted, {} confirmed, {} executed, {} rejected.",
            count(IntentStatus::Drafted),
            count(IntentStatus::Confirmed),
            count(IntentStatus::Executed),
            count(IntentStatus::Rejected)
        ));
    }

    if let Some(error) = &state.error {
        lines.push(format!("Error ({}): {}", error.kind, error.message));
    }
    lines.join("\n")
}
