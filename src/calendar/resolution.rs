use crate::calendar::availability::WorkingHours;
use crate::calendar::conflict::{has_conflict, Conflict};
use crate::calendar::model::{Attendee, CalendarSnapshot, Candidate, Event, TimeWindow};
use crate::shared::ids::{EventId, OptionId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const BASE_SCORE: i64 = 1000;
pub const DISTANCE_MINUTES_PER_POINT: i64 = 3;
pub const MOVE_DISRUPTION_PENALTY: i64 = 100;
pub const AFFECTED_ATTENDEE_PENALTY: i64 = 25;
pub const PRIORITY_ALIGNMENT_WEIGHT: i64 = 150;
pub const ESCALATION_SCORE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    ShiftCandidate,
    MoveExisting,
    Escalate,
}

impl ResolutionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionStrategy::ShiftCandidate => "shift_candidate",
            ResolutionStrategy::MoveExisting => "move_existing",
            ResolutionStrategy::Escalate => "escalate",
        }
    }
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMove {
    pub event_id: EventId,
    pub event_title: String,
    pub from: TimeWindow,
    pub to: TimeWindow,
    pub attendees: BTreeSet<Attendee>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolutionAction {
    ShiftCandidate {
        candidate: Candidate,
    },
    MoveExisting {
        candidate: Candidate,
        moves: Vec<EventMove>,
    },
    Escalate {
        candidate: Candidate,
        event_ids: Vec<EventId>,
    },
}

impl ResolutionAction {
    pub fn strategy(&self) -> ResolutionStrategy {
        match self {
            ResolutionAction::ShiftCandidate { .. } => ResolutionStrategy::ShiftCandidate,
            ResolutionAction::MoveExisting { .. } => ResolutionStrategy::MoveExisting,
            ResolutionAction::Escalate { .. } => ResolutionStrategy::Escalate,
        }
    }

    pub fn candidate(&self) -> &Candidate {
        match self {
            ResolutionAction::ShiftCandidate { candidate }
            | ResolutionAction::MoveExisting { candidate, .. }
            | ResolutionAction::Escalate { candidate, .. } => candidate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionOption {
    pub id: OptionId,
    pub action: ResolutionAction,
    pub score: i64,
    pub proposed_start: DateTime<Utc>,
    pub rationale: String,
}

impl ResolutionOption {
    pub fn strategy(&self) -> ResolutionStrategy {
        self.action.strategy()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerParams {
    pub search_window: Duration,
    pub slot_step: Duration,
    pub max_shift_options: usize,
    pub not_before: Option<DateTime<Utc>>,
    pub working_hours: Option<WorkingHours>,
}

impl PlannerParams {
    pub fn new(search_window: Duration) -> Self {
        Self {
            search_window,
            slot_step: Duration::minutes(15),
            max_shift_options: 2,
            not_before: None,
            working_hours: None,
        }
    }
}

pub fn plan_resolutions(
    candidate: &Candidate,
    conflicts: &[Conflict],
    snapshot: &CalendarSnapshot,
    params: &PlannerParams,
) -> Vec<ResolutionOption> {
    if conflicts.is_empty() {
        return Vec::new();
    }

    let mut options = shift_options(candidate, snapshot, params);
    let lowest_shift = options.iter().map(|option| option.score).min();
    options.extend(move_option(candidate, conflicts, snapshot, params, lowest_shift));
    let shift_found = lowest_shift.is_some();
    if !shift_found {
        options.extend(escalation_option(candidate, conflicts));
    }

    options.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.proposed_start.cmp(&b.proposed_start))
            .then_with(|| a.id.cmp(&b.id))
    });
    options
}

pub fn distance_penalty(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_minutes().abs() / DISTANCE_MINUTES_PER_POINT
}

fn shift_options(
    candidate: &Candidate,
    snapshot: &CalendarSnapshot,
    params: &PlannerParams,
) -> Vec<ResolutionOption> {
    let mut options = Vec::new();
    if params.max_shift_options == 0 {
        return options;
    }
    for start in search_offsets(candidate.start, params) {
        let shifted = candidate.shifted_to(start);
        if !slot_allowed(&shifted, params) {
            continue;
        }
        if snapshot
            .events()
            .iter()
            .any(|event| has_conflict(&shifted, event))
        {
            continue;
        }
        let minutes_away = (start - candidate.start).num_minutes();
        let score = BASE_SCORE - distance_penalty(candidate.start, start);
        options.push(ResolutionOption {
            id: option_id(format!("shift-{}", compact_timestamp(start))),
            proposed_start: start,
            score,
            rationale: format!(
                "move the new meeting {} {} to a slot free for every attendee",
                minutes_away.abs(),
                if minutes_away >= 0 { "minutes later" } else { "minutes earlier" }
            ),
            action: ResolutionAction::ShiftCandidate { candidate: shifted },
        });
        if options.len() >= params.max_shift_options {
            break;
        }
    }
    options
}

/// Moves every conflicting event out of the way, provided each is mutable, no
/// higher priority than the candidate, and has a free slot of its own. Moving
/// an event of the candidate's own priority always ranks below every shift.
fn move_option(
    candidate: &Candidate,
    conflicts: &[Conflict],
    snapshot: &CalendarSnapshot,
    params: &PlannerParams,
    lowest_shift: Option<i64>,
) -> Option<ResolutionOption> {
    let moving_ids = conflicts
        .iter()
        .map(|conflict| conflict.event_id.clone())
        .collect::<BTreeSet<_>>();
    let mut placed: Vec<Event> = Vec::new();
    let mut moves = Vec::new();

    for event_id in &moving_ids {
        let event = snapshot.event(event_id)?;
        if !event.mutable || event.priority > candidate.priority {
            return None;
        }
        let from = event.window().ok()?;
        let new_start = search_offsets(event.start, params).find(|start| {
            let probe = Candidate {
                title: event.title.clone(),
                start: *start,
                end: *start + from.duration(),
                attendees: event.attendees.clone(),
                priority: event.priority,
                resource: event.resource.clone(),
            };
            slot_allowed(&probe, params)
                && !moved_event_collides(&probe, candidate)
                && snapshot
                    .events()
                    .iter()
                    .filter(|other| !moving_ids.contains(&other.id))
                    .chain(placed.iter())
                    .all(|other| !has_conflict(&probe, other))
        })?;
        let to = TimeWindow::new(new_start, new_start + from.duration()).ok()?;
        placed.push(Event {
            start: to.start(),
            end: to.end(),
            ..event.clone()
        });
        moves.push(EventMove {
            event_id: event.id.clone(),
            event_title: event.title.clone(),
            from,
            to,
            attendees: event.attendees.clone(),
        });
    }

    let affected = moves
        .iter()
        .flat_map(|mv| mv.attendees.iter())
        .collect::<BTreeSet<_>>()
        .len() as i64;
    let alignment = moves
        .iter()
        .filter_map(|mv| snapshot.event(&mv.event_id))
        .map(|event| (candidate.priority.rank() - event.priority.rank()) * PRIORITY_ALIGNMENT_WEIGHT)
        .sum::<i64>();
    let displaces_peer = moves
        .iter()
        .filter_map(|mv| snapshot.event(&mv.event_id))
        .any(|event| event.priority >= candidate.priority);
    let mut score = BASE_SCORE - MOVE_DISRUPTION_PENALTY * moves.len() as i64
        - AFFECTED_ATTENDEE_PENALTY * affected
        + alignment;
    if let (true, Some(floor)) = (displaces_peer, lowest_shift) {
        score = score.min(floor - 1);
    }
    let ids = moving_ids
        .iter()
        .map(EventId::as_str)
        .collect::<Vec<_>>()
        .join(".");
    let titles = moves
        .iter()
        .map(|mv| format!("`{}`", display_title(&mv.event_title, &mv.event_id)))
        .collect::<Vec<_>>()
        .join(", ");

    Some(ResolutionOption {
        id: option_id(format!("move-{ids}")),
        proposed_start: candidate.start,
        score,
        rationale: format!(
            "keep the requested time and reschedule {titles}, affecting {affected} attendee(s)"
        ),
        action: ResolutionAction::MoveExisting {
            candidate: candidate.clone(),
            moves,
        },
    })
}

fn escalation_option(candidate: &Candidate, conflicts: &[Conflict]) -> Option<ResolutionOption> {
    let tied = conflicts
        .iter()
        .filter(|conflict| conflict.event_priority == candidate.priority)
        .map(|conflict| conflict.event_id.clone())
        .collect::<BTreeSet<_>>();
    if tied.is_empty() {
        return None;
    }
    let ids = tied.iter().map(EventId::as_str).collect::<Vec<_>>().join(".");
    Some(ResolutionOption {
        id: option_id(format!("escalate-{ids}")),
        proposed_start: candidate.start,
        score: ESCALATION_SCORE,
        rationale: format!(
            "priorities tie with {} event(s) and no free slot exists within the search window; needs a human decision",
            tied.len()
        ),
        action: ResolutionAction::Escalate {
            candidate: candidate.clone(),
            event_ids: tied.into_iter().collect(),
        },
    })
}

fn search_offsets(
    origin: DateTime<Utc>,
    params: &PlannerParams,
) -> impl Iterator<Item = DateTime<Utc>> + '_ {
    let step_minutes = params.slot_step.num_minutes().max(1);
    let max_steps = params.search_window.num_minutes().max(0) / step_minutes;
    (1..=max_steps)
        .flat_map(move |k| {
            let offset = Duration::minutes(k * step_minutes);
            [origin + offset, origin - offset]
        })
        .filter(move |start| params.not_before.map(|floor| *start >= floor).unwrap_or(true))
}

fn slot_allowed(slot: &Candidate, params: &PlannerParams) -> bool {
    match (&params.working_hours, slot.window()) {
        (_, Err(_)) => false,
        (Some(hours), Ok(window)) => hours.contains(&window),
        (None, Ok(_)) => true,
    }
}

fn moved_event_collides(moved: &Candidate, candidate: &Candidate) -> bool {
    moved.start < candidate.end
        && candidate.start < moved.end
        && (!moved.attendees.is_disjoint(&candidate.attendees)
            || matches!(
                (moved.resource.as_deref(), candidate.resource.as_deref()),
                (Some(a), Some(b)) if a == b
            ))
}

fn compact_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dt%H%Mz").to_string()
}

fn display_title<'a>(title: &'a str, id: &'a EventId) -> &'a str {
    if title.trim().is_empty() {
        id.as_str()
    } else {
        title
    }
}

fn option_id(raw: String) -> OptionId {
    OptionId::sanitized(&raw)
}
