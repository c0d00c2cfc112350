use crate::gate::intent::{ActionIntent, IntentRecord};
use crate::shared::fs_atomic::atomic_write_json;
use crate::shared::ids::IntentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReceipt {
    pub intent_id: IntentId,
    pub reference: String,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionError {
    #[error("backend write failed for intent `{intent_id}`: {reason}")]
    Backend { intent_id: IntentId, reason: String },
    #[error("executor panicked while handling intent `{intent_id}`")]
    Panicked { intent_id: IntentId },
    #[error("intent `{intent_id}` was applied but its status could not be updated: {reason}")]
    StatusUpdate { intent_id: IntentId, reason: String },
}

impl ExecutionError {
    pub fn intent_id(&self) -> &IntentId {
        match self {
            ExecutionError::Backend { intent_id, .. }
            | ExecutionError::Panicked { intent_id }
            | ExecutionError::StatusUpdate { intent_id, .. } => intent_id,
        }
    }
}

pub trait Executor: Send + Sync {
    fn execute(&self, intent: &ActionIntent) -> Result<ExecutionReceipt, ExecutionError>;
}

#[derive(Debug, Clone)]
pub struct OutboxExecutor {
    dir: PathBuf,
}

impl OutboxExecutor {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Executor for OutboxExecutor {
    fn execute(&self, intent: &ActionIntent) -> Result<ExecutionReceipt, ExecutionError> {
        let path = self.dir.join(format!("{}.json", intent.id));
        atomic_write_json(&path, &IntentRecord::from(intent)).map_err(|err| ExecutionError::Backend {
            intent_id: intent.id.clone(),
            reason: format!("failed to write {}: {err}", path.display()),
        })?;
        Ok(ExecutionReceipt {
            intent_id: intent.id.clone(),
            reference: path.display().to_string(),
            executed_at: Utc::now(),
        })
    }
}

#[derive(Debug, Default)]
pub struct RecordingExecutor {
    executed: Mutex<Vec<ActionIntent>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> Vec<ActionIntent> {
        self.executed
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn call_count(&self) -> usize {
        self.executed().len()
    }
}

impl Executor for RecordingExecutor {
    fn execute(&self, intent: &ActionIntent) -> Result<ExecutionReceipt, ExecutionError> {
        let mut executed = self
            .executed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        executed.push(intent.clone());
        Ok(ExecutionReceipt {
            intent_id: intent.id.clone(),
            reference: format!("recorded-{}", executed.len()),
            executed_at: Utc::now(),
        })
    }
}
