use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Analyzing,
    Proposing,
    ConflictCheck,
    Resolving,
    Drafting,
    AwaitingConfirmation,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Start,
    SnapshotLoaded,
    CandidateProposed,
    ConflictsFound,
    NoConflicts,
    OptionSelected,
    IntentsDrafted,
    IntentsSettled,
    ExecutionSettled,
    Fail,
    Cancel,
}

impl Stage {
    pub const ALL: [Stage; 11] = [
        Stage::Init,
        Stage::Analyzing,
        Stage::Proposing,
        Stage::ConflictCheck,
        Stage::Resolving,
        Stage::Drafting,
        Stage::AwaitingConfirmation,
        Stage::Executing,
        Stage::Completed,
        Stage::Failed,
        Stage::Cancelled,
    ];

    pub fn next(self, trigger: Trigger) -> Option<Stage> {
        if self.is_terminal() {
            return None;
        }
        let next = match (self, trigger) {
            (_, Trigger::Fail) => Stage::Failed,
            (_, Trigger::Cancel) => Stage::Cancelled,
            (Stage::Init, Trigger::Start) => Stage::Analyzing,
            (Stage::Analyzing, Trigger::SnapshotLoaded) => Stage::Proposing,
            (Stage::Proposing, Trigger::CandidateProposed) => Stage::ConflictCheck,
            (Stage::ConflictCheck, Trigger::ConflictsFound) => Stage::Resolving,
            (Stage::ConflictCheck, Trigger::NoConflicts) => Stage::Drafting,
            (Stage::Resolving, Trigger::OptionSelected) => Stage::Drafting,
            (Stage::Drafting, Trigger::IntentsDrafted) => Stage::AwaitingConfirmation,
            (Stage::AwaitingConfirmation, Trigger::IntentsSettled) => Stage::Executing,
            (Stage::Executing, Trigger::ExecutionSettled) => Stage::Completed,
            _ => return None,
        };
        Some(next)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        Trigger::ALL
            .into_iter()
            .any(|trigger| self.next(trigger) == Some(next))
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed | Stage::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Analyzing => "analyzing",
            Stage::Proposing => "proposing",
            Stage::ConflictCheck => "conflict_check",
            Stage::Resolving => "resolving",
            Stage::Drafting => "drafting",
            Stage::AwaitingConfirmation => "awaiting_confirmation",
            Stage::Executing => "executing",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
            Stage::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Trigger {
    pub const ALL: [Trigger; 11] = [
        Trigger::Start,
        Trigger::SnapshotLoaded,
        Trigger::CandidateProposed,
        Trigger::ConflictsFound,
        Trigger::NoConflicts,
        Trigger::OptionSelected,
        Trigger::IntentsDrafted,
        Trigger::IntentsSettled,
        Trigger::ExecutionSettled,
        Trigger::Fail,
        Trigger::Cancel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Start => "start",
            Trigger::SnapshotLoaded => "snapshot_loaded",
            Trigger::CandidateProposed => "candidate_proposed",
            Trigger::ConflictsFound => "conflicts_found",
            Trigger::NoConflicts => "no_conflicts",
            Trigger::OptionSelected => "option_selected",
            Trigger::IntentsDrafted => "intents_drafted",
            Trigger::IntentsSettled => "intents_settled",
            Trigger::ExecutionSettled => "execution_settled",
            Trigger::Fail => "fail",
            Trigger::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
