use super::ConfigError;
use crate::calendar::analysis::AnalysisParams;
use crate::calendar::availability::WorkingHours;
use crate::calendar::loader::RetryPolicy;
use crate::gate::dispatch::DEFAULT_MAX_CONCURRENCY;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub state_root: Option<PathBuf>,
    #[serde(default)]
    pub run_defaults: RunDefaults,
    #[serde(default)]
    pub planner: PlannerSettings,
    #[serde(default)]
    pub analysis: AnalysisSettings,
    #[serde(default)]
    pub snapshot: SnapshotSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub execution: ExecutionSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RunDefaults {
    #[serde(default)]
    pub auto_confirm_low_risk: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,
    #[serde(default = "default_search_window_minutes")]
    pub search_window_minutes: u32,
    #[serde(default)]
    pub interactive_resolution: bool,
    #[serde(default)]
    pub confirmation_timeout_ms: Option<u64>,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            auto_confirm_low_risk: false,
            dry_run: false,
            stage_timeout_ms: default_stage_timeout_ms(),
            search_window_minutes: default_search_window_minutes(),
            interactive_resolution: false,
            confirmation_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlannerSettings {
    #[serde(default = "default_slot_step_minutes")]
    pub slot_step_minutes: u32,
    #[serde(default = "default_max_shift_options")]
    pub max_shift_options: usize,
    #[serde(default)]
    pub working_hours: Option<WorkingHoursSettings>,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            slot_step_minutes: default_slot_step_minutes(),
            max_shift_options: default_max_shift_options(),
            working_hours: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkingHoursSettings {
    #[serde(default = "default_workday_start_hour")]
    pub start_hour: u32,
    #[serde(default = "default_workday_end_hour")]
    pub end_hour: u32,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for WorkingHoursSettings {
    fn default() -> Self {
        Self {
            start_hour: default_workday_start_hour(),
            end_hour: default_workday_end_hour(),
            timezone: default_timezone(),
        }
    }
}

impl WorkingHoursSettings {
    pub fn resolve(&self) -> Result<WorkingHours, ConfigError> {
        WorkingHours::new(self.start_hour, self.end_hour, &self.timezone)
            .map_err(|err| ConfigError::Settings(format!("`planner.working_hours`: {err}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AnalysisSettings {
    #[serde(default = "default_tight_gap_minutes")]
    pub tight_gap_minutes: u32,
    #[serde(default = "default_working_day_minutes")]
    pub working_day_minutes: u32,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            tight_gap_minutes: default_tight_gap_minutes(),
            working_day_minutes: default_working_day_minutes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SnapshotSettings {
    #[serde(default = "default_horizon_hours")]
    pub horizon_hours: u32,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            horizon_hours: default_horizon_hours(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExecutionSettings {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_stage_timeout_ms() -> u64 {
    30_000
}

fn default_search_window_minutes() -> u32 {
    480
}

fn default_slot_step_minutes() -> u32 {
    15
}

fn default_max_shift_options() -> usize {
    2
}

fn default_workday_start_hour() -> u32 {
    9
}

fn default_workday_end_hour() -> u32 {
    17
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_tight_gap_minutes() -> u32 {
    5
}

fn default_working_day_minutes() -> u32 {
    480
}

fn default_horizon_hours() -> u32 {
    168
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_backoff_multiplier() -> u32 {
    2
}

fn default_max_backoff_ms() -> u64 {
    2000
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let defaults = &self.run_defaults;
        if defaults.stage_timeout_ms == 0 {
            return Err(ConfigError::Settings(
                "`run_defaults.stage_timeout_ms` must be >= 1".to_string(),
            ));
        }
        if defaults.search_window_minutes == 0 {
            return Err(ConfigError::Settings(
                "`run_defaults.search_window_minutes` must be >= 1".to_string(),
            ));
        }
        if defaults.confirmation_timeout_ms == Some(0) {
            return Err(ConfigError::Settings(
                "`run_defaults.confirmation_timeout_ms` must be >= 1 when set".to_string(),
            ));
        }
        if self.planner.slot_step_minutes == 0 {
            return Err(ConfigError::Settings(
                "`planner.slot_step_minutes` must be >= 1".to_string(),
            ));
        }
        if let Some(hours) = &self.planner.working_hours {
            hours.resolve()?;
        }
        if self.analysis.working_day_minutes == 0 {
            return Err(ConfigError::Settings(
                "`analysis.working_day_minutes` must be >= 1".to_string(),
            ));
        }
        if self.snapshot.horizon_hours == 0 {
            return Err(ConfigError::Settings(
                "`snapshot.horizon_hours` must be >= 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Settings(
                "`retry.max_attempts` must be >= 1".to_string(),
            ));
        }
        if self.retry.backoff_multiplier == 0 {
            return Err(ConfigError::Settings(
                "`retry.backoff_multiplier` must be >= 1".to_string(),
            ));
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(ConfigError::Settings(
                "`retry.max_backoff_ms` must be >= `retry.initial_backoff_ms`".to_string(),
            ));
        }
        if self.execution.max_concurrency == 0 {
            return Err(ConfigError::Settings(
                "`execution.max_concurrency` must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn planner_working_hours(&self) -> Result<Option<WorkingHours>, ConfigError> {
        self.planner
            .working_hours
            .as_ref()
            .map(WorkingHoursSettings::resolve)
            .transpose()
    }

    pub fn availability_hours(&self) -> Result<WorkingHours, ConfigError> {
        Ok(self.planner_working_hours()?.unwrap_or_default())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            backoff_multiplier: self.retry.backoff_multiplier,
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
        }
    }

    pub fn analysis_params(&self) -> AnalysisParams {
        AnalysisParams {
            tight_gap: chrono::Duration::minutes(i64::from(self.analysis.tight_gap_minutes)),
            working_day: chrono::Duration::minutes(i64::from(self.analysis.working_day_minutes)),
        }
    }

    pub fn snapshot_horizon(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.snapshot.horizon_hours))
    }
}
