use crate::calendar::analysis::CalendarAnalysis;
use crate::calendar::availability::AvailabilityReport;
use crate::calendar::conflict::Conflict;
use crate::calendar::model::{Candidate, Request};
use crate::calendar::resolution::ResolutionOption;
use crate::gate::{IntentRecord, IntentStatus};
use crate::orchestration::error::ErrorKind;
use crate::orchestration::outcome::SubmissionRecord;
use crate::orchestration::stage::{Stage, Trigger};
use crate::shared::ids::{IntentId, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::Receiver;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageEvent {
    pub run_id: RunId,
    pub sequence: u64,
    pub from: Stage,
    pub to: Stage,
    pub trigger: Trigger,
    pub at: DateTime<Utc>,
    pub stage_completed: bool,
    pub delta: StageDelta,
}

impl StageEvent {
    pub fn is_terminal(&self) -> bool {
        self.to.is_terminal()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentStatusEntry {
    pub intent_id: IntentId,
    pub status: IntentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageDelta {
    Started {
        request: Request,
    },
    #[serde(rename_all = "camelCase")]
    SnapshotLoaded {
        event_count: usize,
        fetch_attempts: u32,
        analysis: CalendarAnalysis,
        availability: Option<AvailabilityReport>,
    },
    CandidateProposed {
        candidate: Candidate,
    },
    ConflictsDetected {
        conflicts: Vec<Conflict>,
        options: Vec<ResolutionOption>,
    },
    OptionSelected {
        option: ResolutionOption,
    },
    IntentsDrafted {
        intents: Vec<IntentRecord>,
    },
    IntentsSettled {
        intents: Vec<IntentStatusEntry>,
    },
    ExecutionSettled {
        submissions: Vec<SubmissionRecord>,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
    Cancelled {
        rejected: Vec<IntentId>,
    },
}

impl StageDelta {
    pub fn name(&self) -> &'static str {
        match self {
            StageDelta::Started { .. } => "started",
            StageDelta::SnapshotLoaded { .. } => "snapshot_loaded",
            StageDelta::CandidateProposed { .. } => "candidate_proposed",
            StageDelta::ConflictsDetected { .. } => "conflicts_detected",
            StageDelta::OptionSelected { .. } => "option_selected",
            StageDelta::IntentsDrafted { .. } => "intents_drafted",
            StageDelta::IntentsSettled { .. } => "intents_settled",
            StageDelta::ExecutionSettled { .. } => "execution_settled",
            StageDelta::Failed { .. } => "failed",
            StageDelta::Cancelled { .. } => "cancelled",
        }
    }
}

/// Ordered stream of one run's transitions. Ends after the terminal event;
/// events are buffered until read, so a late or slow reader misses nothing.
#[derive(Debug)]
pub struct StageEvents {
    receiver: Receiver<StageEvent>,
    finished: bool,
}

impl StageEvents {
    pub(crate) fn new(receiver: Receiver<StageEvent>) -> Self {
        Self {
            receiver,
            finished: false,
        }
    }
}

impl Iterator for StageEvents {
    type Item = StageEvent;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.receiver.recv() {
            Ok(event) => {
                self.finished = event.is_terminal();
                Some(event)
            }
            Err(_) => {
                self.finished = true;
                None
            }
        }
    }
}
