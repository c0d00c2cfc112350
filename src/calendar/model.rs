use crate::shared::ids::EventId;
use chrono::{DateTime, Duration, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Attendee(String);

impl Attendee {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let normalized = raw.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err("attendee must be non-empty".to_string());
        }
        if normalized.chars().any(char::is_whitespace) {
            return Err(format!("attendee `{normalized}` must not contain whitespace"));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Attendee {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl<'de> Deserialize<'de> for Attendee {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(|err| D::Error::custom(format!("invalid attendee: {err}")))
    }
}

pub fn attendee_set<'a>(raw: impl IntoIterator<Item = &'a str>) -> Result<BTreeSet<Attendee>, String> {
    raw.into_iter().map(Attendee::parse).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn rank(self) -> i64 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Critical => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, String> {
        if end <= start {
            return Err(format!(
                "time window end `{end}` must be after start `{start}`"
            ));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn intersection(&self, other: &TimeWindow) -> Option<TimeWindow> {
        if !self.overlaps(other) {
            return None;
        }
        Some(TimeWindow {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        })
    }

    pub fn contains(&self, other: &TimeWindow) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    #[serde(default)]
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub attendees: BTreeSet<Attendee>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_true")]
    pub mutable: bool,
    #[serde(default)]
    pub resource: Option<String>,
}

impl Event {
    pub fn window(&self) -> Result<TimeWindow, String> {
        TimeWindow::new(self.start, self.end)
            .map_err(|err| format!("event `{}` has an invalid interval: {err}", self.id))
    }

    pub fn shares_participant(&self, attendees: &BTreeSet<Attendee>, resource: Option<&str>) -> bool {
        if !self.attendees.is_disjoint(attendees) {
            return true;
        }
        matches!(
            (self.resource.as_deref(), resource),
            (Some(mine), Some(theirs)) if mine == theirs
        )
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarSnapshot {
    fetched_at: DateTime<Utc>,
    window: TimeWindow,
    events: Vec<Event>,
}

impl CalendarSnapshot {
    pub fn new(
        fetched_at: DateTime<Utc>,
        window: TimeWindow,
        mut events: Vec<Event>,
    ) -> Result<Self, String> {
        for event in &events {
            event.window()?;
        }
        events.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        Ok(Self {
            fetched_at,
            window,
            events,
        })
    }

    pub fn empty(fetched_at: DateTime<Utc>, window: TimeWindow) -> Self {
        Self {
            fetched_at,
            window,
            events: Vec::new(),
        }
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn event(&self, id: &EventId) -> Option<&Event> {
        self.events.iter().find(|event| &event.id == id)
    }

    pub fn events_overlapping(&self, window: TimeWindow) -> impl Iterator<Item = &Event> + '_ {
        self.events.iter().filter(move |event| {
            event
                .window()
                .map(|interval| interval.overlaps(&window))
                .unwrap_or(false)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub attendees: BTreeSet<Attendee>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub resource: Option<String>,
}

impl Candidate {
    pub fn window(&self) -> Result<TimeWindow, String> {
        TimeWindow::new(self.start, self.end)
            .map_err(|err| format!("candidate has an invalid interval: {err}"))
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn shifted_to(&self, start: DateTime<Utc>) -> Candidate {
        Candidate {
            start,
            end: start + self.duration(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestConstraints {
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub attendees: BTreeSet<Attendee>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub text: String,
    pub reference_time: DateTime<Utc>,
    #[serde(default)]
    pub constraints: RequestConstraints,
}

impl Request {
    pub fn new(text: impl Into<String>, reference_time: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            reference_time,
            constraints: RequestConstraints::default(),
        }
    }

    pub fn with_constraints(mut self, constraints: RequestConstraints) -> Self {
        self.constraints = constraints;
        self
    }
}
