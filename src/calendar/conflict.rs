use crate::calendar::model::{Attendee, CalendarSnapshot, Candidate, Event, Priority, TimeWindow};
use crate::shared::ids::EventId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub event_id: EventId,
    pub event_title: String,
    pub overlap: TimeWindow,
    pub severity: Priority,
    pub candidate_priority: Priority,
    pub event_priority: Priority,
    pub shared_attendees: BTreeSet<Attendee>,
    #[serde(default)]
    pub shared_resource: Option<String>,
    pub event_mutable: bool,
}

pub fn intervals_overlap(candidate: &Candidate, event: &Event) -> bool {
    candidate.start < event.end && event.start < candidate.end
}

pub fn has_conflict(candidate: &Candidate, event: &Event) -> bool {
    intervals_overlap(candidate, event)
        && event.shares_participant(&candidate.attendees, candidate.resource.as_deref())
}

pub fn conflict_between(candidate: &Candidate, event: &Event) -> Option<Conflict> {
    if !has_conflict(candidate, event) {
        return None;
    }
    let overlap = TimeWindow::new(
        candidate.start.max(event.start),
        candidate.end.min(event.end),
    )
    .ok()?;
    let shared_resource = match (candidate.resource.as_deref(), event.resource.as_deref()) {
        (Some(mine), Some(theirs)) if mine == theirs => Some(mine.to_string()),
        _ => None,
    };
    Some(Conflict {
        event_id: event.id.clone(),
        event_title: event.title.clone(),
        overlap,
        severity: candidate.priority.min(event.priority),
        candidate_priority: candidate.priority,
        event_priority: event.priority,
        shared_attendees: candidate
            .attendees
            .intersection(&event.attendees)
            .cloned()
            .collect(),
        shared_resource,
        event_mutable: event.mutable,
    })
}

pub fn detect_conflicts(candidate: &Candidate, snapshot: &CalendarSnapshot) -> Vec<Conflict> {
    let mut conflicts = snapshot
        .events()
        .iter()
        .filter_map(|event| conflict_between(candidate, event))
        .collect::<Vec<_>>();
    conflicts.sort_by(|a, b| {
        a.overlap
            .start()
            .cmp(&b.overlap.start())
            .then_with(|| a.event_id.cmp(&b.event_id))
    });
    conflicts
}

pub fn is_slot_free(candidate: &Candidate, snapshot: &CalendarSnapshot) -> bool {
    snapshot
        .events()
        .iter()
        .all(|event| !has_conflict(candidate, event))
}
