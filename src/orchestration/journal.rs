use crate::orchestration::error::OrchestratorError;
use crate::orchestration::outcome::RunOutcome;
use crate::orchestration::progress::StageEvent;
use crate::shared::fs_atomic::atomic_write_file;
use crate::shared::ids::RunId;
use crate::shared::logging::{append_log_line, chronos_log_path, format_log_line};
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub fn run_dir(state_root: &Path, run_id: &RunId) -> PathBuf {
    state_root.join("runs").join(run_id.as_str())
}

pub fn progress_path(state_root: &Path, run_id: &RunId) -> PathBuf {
    run_dir(state_root, run_id).join("progress.json")
}

pub fn outcome_path(state_root: &Path, run_id: &RunId) -> PathBuf {
    run_dir(state_root, run_id).join("outcome.json")
}

#[derive(Debug, Clone)]
pub struct RunJournal {
    state_root: Option<PathBuf>,
    run_id: RunId,
}

impl RunJournal {
    pub fn new(state_root: Option<PathBuf>, run_id: RunId) -> Self {
        Self { state_root, run_id }
    }

    pub fn is_enabled(&self) -> bool {
        self.state_root.is_some()
    }

    pub fn record_event(&self, event: &StageEvent) -> Result<(), OrchestratorError> {
        let Some(root) = &self.state_root else {
            return Ok(());
        };
        write_json(&progress_path(root, &self.run_id), event)?;
        let sequence = event.sequence.to_string();
        let completed = event.stage_completed.to_string();
        self.log(
            "stage_transition",
            &[
                ("sequence", sequence.as_str()),
                ("from", event.from.as_str()),
                ("to", event.to.as_str()),
                ("trigger", event.trigger.as_str()),
                ("stage_completed", completed.as_str()),
                ("delta", event.delta.name()),
            ],
        )
    }

    pub fn record_outcome(&self, outcome: &RunOutcome) -> Result<(), OrchestratorError> {
        let Some(root) = &self.state_root else {
            return Ok(());
        };
        write_json(&outcome_path(root, &self.run_id), outcome)?;
        let error_kind = outcome
            .error
            .as_ref()
            .map(|error| error.kind.as_str())
            .unwrap_or("none");
        let intents = outcome.intents.len().to_string();
        self.log(
            "run_finished",
            &[
                ("final_stage", outcome.final_stage.as_str()),
                ("error_kind", error_kind),
                ("intents", intents.as_str()),
            ],
        )
    }

    pub fn log(&self, event: &str, fields: &[(&str, &str)]) -> Result<(), OrchestratorError> {
        let Some(root) = &self.state_root else {
            return Ok(());
        };
        let mut all = vec![("run_id", self.run_id.as_str()), ("event", event)];
        all.extend_from_slice(fields);
        let line = format_log_line(Utc::now(), &all);
        append_log_line(root, &line).map_err(|source| OrchestratorError::Io {
            path: chronos_log_path(root).display().to_string(),
            source,
        })
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), OrchestratorError> {
    let body = serde_json::to_vec_pretty(value).map_err(|source| OrchestratorError::Json {
        path: path.display().to_string(),
        source,
    })?;
    atomic_write_file(path, &body).map_err(|source| OrchestratorError::Io {
        path: path.display().to_string(),
        source,
    })
}

pub fn load_outcome(state_root: &Path, run_id: &RunId) -> Result<RunOutcome, OrchestratorError> {
    let path = outcome_path(state_root, run_id);
    let raw = fs::read_to_string(&path).map_err(|source| OrchestratorError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| OrchestratorError::Json {
        path: path.display().to_string(),
        source,
    })
}

pub fn load_progress(state_root: &Path, run_id: &RunId) -> Result<StageEvent, OrchestratorError> {
    let path = progress_path(state_root, run_id);
    let raw = fs::read_to_string(&path).map_err(|source| OrchestratorError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| OrchestratorError::Json {
        path: path.display().to_string(),
        source,
    })
}
