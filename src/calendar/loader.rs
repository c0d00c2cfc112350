use crate::calendar::model::{CalendarSnapshot, Event, TimeWindow};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("calendar backend unavailable: {0}")]
    Unavailable(String),
    #[error("calendar backend timed out: {0}")]
    TimedOut(String),
    #[error("calendar data is malformed: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Transient failures are retried; malformed data never is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Unavailable(_) | FetchError::TimedOut(_))
    }
}

pub trait SnapshotLoader: Send + Sync {
    fn load_snapshot(&self, window: TimeWindow) -> Result<CalendarSnapshot, FetchError>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticSnapshotLoader {
    events: Vec<Event>,
}

impl StaticSnapshotLoader {
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }
}

impl SnapshotLoader for StaticSnapshotLoader {
    fn load_snapshot(&self, window: TimeWindow) -> Result<CalendarSnapshot, FetchError> {
        snapshot_from_events(window, self.events.iter().cloned())
    }
}

#[derive(Debug, Clone)]
pub struct JsonFileSnapshotLoader {
    path: PathBuf,
}

impl JsonFileSnapshotLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotLoader for JsonFileSnapshotLoader {
    fn load_snapshot(&self, window: TimeWindow) -> Result<CalendarSnapshot, FetchError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|err| {
            FetchError::Unavailable(format!("failed to read {}: {err}", self.path.display()))
        })?;
        let events: Vec<Event> = serde_json::from_str(&raw).map_err(|err| {
            FetchError::Malformed(format!("invalid events in {}: {err}", self.path.display()))
        })?;
        snapshot_from_events(window, events)
    }
}

fn snapshot_from_events(
    window: TimeWindow,
    events: impl IntoIterator<Item = Event>,
) -> Result<CalendarSnapshot, FetchError> {
    let mut relevant = Vec::new();
    for event in events {
        let interval = event.window().map_err(FetchError::Malformed)?;
        if interval.overlaps(&window) {
            relevant.push(event);
        }
    }
    CalendarSnapshot::new(Utc::now(), window, relevant).map_err(FetchError::Malformed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 2,
            max_backoff: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub error: FetchError,
    pub backoff: Duration,
}

pub fn load_with_retry(
    loader: &dyn SnapshotLoader,
    window: TimeWindow,
    policy: &RetryPolicy,
    cancel: &AtomicBool,
    deadline: Option<Instant>,
    mut on_retry: impl FnMut(&RetryAttempt),
) -> Result<CalendarSnapshot, FetchError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match loader.load_snapshot(window) {
            Ok(snapshot) => return Ok(snapshot),
            Err(err) => err,
        };
        if !err.is_retryable() || attempt >= max_attempts {
            return Err(err);
        }
        let backoff = policy.backoff_for(attempt);
        if deadline
            .map(|limit| Instant::now() + backoff >= limit)
            .unwrap_or(false)
        {
            return Err(err);
        }
        on_retry(&RetryAttempt {
            attempt,
            error: err.clone(),
            backoff,
        });
        if !sleep_unless_cancelled(cancel, backoff) {
            return Err(err);
        }
        attempt += 1;
    }
}

fn sleep_unless_cancelled(cancel: &AtomicBool, total: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(Duration::from_millis(25));
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    !cancel.load(Ordering::Relaxed)
}
