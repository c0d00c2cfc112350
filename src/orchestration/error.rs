use crate::calendar::loader::FetchError;
use crate::config::ConfigError;
use crate::gate::{ExecutionError, GateRejection, IntentTransitionError};
use crate::orchestration::stage::Stage;
use crate::reasoner::ReasonerError;
use crate::shared::ids::{IntentId, OptionId, RunId};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("calendar fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Reasoner(#[from] ReasonerError),
    #[error("action gate rejected intent: {0}")]
    Gate(#[from] GateRejection),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("stage `{stage}` timed out after {timeout_ms}ms")]
    Timeout { stage: Stage, timeout_ms: u64 },
    #[error("run stage transition `{from}` -> `{to}` is invalid")]
    InvalidTransition { from: Stage, to: Stage },
    #[error(transparent)]
    InvalidIntentTransition(#[from] IntentTransitionError),
    #[error("intent `{intent_id}` is not part of this run")]
    UnknownIntent { intent_id: IntentId },
    #[error("resolution option `{option_id}` is not part of this run")]
    UnknownOption { option_id: OptionId },
    #[error("no resolution options found for {conflicts} conflict(s)")]
    NoResolutionOptions { conflicts: usize },
    #[error("`{command}` is not accepted while the run is `{stage}`")]
    UnexpectedCommand { command: &'static str, stage: Stage },
    #[error("run events already have a subscriber")]
    AlreadySubscribed,
    #[error("run `{run_id}` has already finished")]
    RunFinished { run_id: RunId },
    #[error("{collaborator} panicked during `{stage}`")]
    CollaboratorPanicked {
        collaborator: &'static str,
        stage: Stage,
    },
    #[error("engine thread for run `{run_id}` panicked")]
    EnginePanicked { run_id: RunId },
    #[error("failed to start {what}: {reason}")]
    Start { what: String, reason: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Fetch,
    Reasoner,
    GateRejection,
    Execution,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Fetch => "fetch",
            ErrorKind::Reasoner => "reasoner",
            ErrorKind::GateRejection => "gate_rejection",
            ErrorKind::Execution => "execution",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Fetch(_) => ErrorKind::Fetch,
            OrchestratorError::Reasoner(_) => ErrorKind::Reasoner,
            OrchestratorError::Gate(_) => ErrorKind::GateRejection,
            OrchestratorError::Execution(_) => ErrorKind::Execution,
            OrchestratorError::Timeout { .. } => ErrorKind::Timeout,
            OrchestratorError::InvalidTransition { .. }
            | OrchestratorError::InvalidIntentTransition(_)
            | OrchestratorError::UnknownIntent { .. }
            | OrchestratorError::UnknownOption { .. }
            | OrchestratorError::NoResolutionOptions { .. }
            | OrchestratorError::UnexpectedCommand { .. }
            | OrchestratorError::AlreadySubscribed
            | OrchestratorError::RunFinished { .. }
            | OrchestratorError::CollaboratorPanicked { .. }
            | OrchestratorError::EnginePanicked { .. }
            | OrchestratorError::Start { .. }
            | OrchestratorError::Config(_)
            | OrchestratorError::Io { .. }
            | OrchestratorError::Json { .. } => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&OrchestratorError> for RunError {
    fn from(err: &OrchestratorError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
