use crate::calendar::availability::AvailabilityReport;
use crate::calendar::conflict::Conflict;
use crate::calendar::model::{CalendarSnapshot, Candidate, Request};
use crate::calendar::resolution::ResolutionOption;
use crate::shared::ids::RunId;
use serde::{Deserialize, Serialize};

pub mod scripted;

pub use scripted::ScriptedReasoner;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReasonerError {
    #[error("reasoner unavailable: {0}")]
    Unavailable(String),
    #[error("reasoner returned malformed output: {0}")]
    Malformed(String),
    #[error("reasoner returned empty output for {0}")]
    Empty(ReasoningPurpose),
    #[error("reasoner returned a {actual} when a {expected} was requested")]
    UnexpectedOutput {
        expected: &'static str,
        actual: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningPurpose {
    ProposeSlot,
    DraftMessage,
}

impl std::fmt::Display for ReasoningPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReasoningPurpose::ProposeSlot => write!(f, "propose_slot"),
            ReasoningPurpose::DraftMessage => write!(f, "draft_message"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningContext {
    pub purpose: ReasoningPurpose,
    pub run_id: RunId,
    #[serde(default)]
    pub availability: Option<AvailabilityReport>,
    #[serde(default)]
    pub candidate: Option<Candidate>,
    #[serde(default)]
    pub candidate_details: Option<String>,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    #[serde(default)]
    pub selected_option: Option<ResolutionOption>,
}

impl ReasoningContext {
    pub fn propose(run_id: RunId, availability: Option<AvailabilityReport>) -> Self {
        Self {
            purpose: ReasoningPurpose::ProposeSlot,
            run_id,
            availability,
            candidate: None,
            candidate_details: None,
            conflicts: Vec::new(),
            selected_option: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReasonerOutput {
    Candidate(Candidate),
    Draft(Draft),
}

impl ReasonerOutput {
    fn kind(&self) -> &'static str {
        match self {
            ReasonerOutput::Candidate(_) => "candidate",
            ReasonerOutput::Draft(_) => "draft",
        }
    }
}

pub trait Reasoner: Send + Sync {
    fn reason(
        &self,
        request: &Request,
        snapshot: &CalendarSnapshot,
        context: &ReasoningContext,
    ) -> Result<ReasonerOutput, ReasonerError>;
}

pub fn accept_candidate(output: ReasonerOutput, request: &Request) -> Result<Candidate, ReasonerError> {
    let candidate = match output {
        ReasonerOutput::Candidate(candidate) => candidate,
        other => {
            return Err(ReasonerError::UnexpectedOutput {
                expected: "candidate",
                actual: other.kind(),
            })
        }
    };
    candidate.window().map_err(ReasonerError::Malformed)?;

    let constraints = &request.constraints;
    if let Some(minutes) = constraints.duration_minutes {
        if candidate.duration().num_minutes() != i64::from(minutes) {
            return Err(ReasonerError::Malformed(format!(
                "candidate lasts {}m but the request asked for {minutes}m",
                candidate.duration().num_minutes()
            )));
        }
    }
    let missing = constraints
        .attendees
        .difference(&candidate.attendees)
        .map(|attendee| attendee.as_str())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(ReasonerError::Malformed(format!(
            "candidate is missing required attendees: {}",
            missing.join(", ")
        )));
    }
    if let Some(priority) = constraints.priority {
        if candidate.priority != priority {
            return Err(ReasonerError::Malformed(format!(
                "candidate priority `{}` differs from requested `{priority}`",
                candidate.priority
            )));
        }
    }
    if constraints.resource.is_some() && candidate.resource != constraints.resource {
        return Err(ReasonerError::Malformed(
            "candidate does not book the requested resource".to_string(),
        ));
    }
    Ok(candidate)
}

pub fn accept_draft(output: ReasonerOutput) -> Result<Draft, ReasonerError> {
    let draft = match output {
        ReasonerOutput::Draft(draft) => draft,
        other => {
            return Err(ReasonerError::UnexpectedOutput {
                expected: "draft",
                actual: other.kind(),
            })
        }
    };
    if draft.subject.trim().is_empty() || draft.body.trim().is_empty() {
        return Err(ReasonerError::Empty(ReasoningPurpose::DraftMessage));
    }
    Ok(draft)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::model::{attendee_set, Priority, RequestConstraints};
    use chrono::{Duration, TimeZone, Utc};

    fn request() -> Request {
        Request::new(
            "30 minutes with al tomorrow",
            Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap(),
        )
        .with_constraints(RequestConstraints {
            duration_minutes: Some(30),
            attendees: attendee_set(["al@example.com"]).expect("attendees"),
            ..RequestConstraints::default()
        })
    }

    fn candidate(minutes: i64, attendees: &[&str]) -> Candidate {
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
        Candidate {
            title: "sync".to_string(),
            start,
            end: start + Duration::minutes(minutes),
            attendees: attendee_set(attendees.iter().copied()).expect("attendees"),
            priority: Priority::Normal,
            resource: None,
        }
    }

    #[test]
    fn accepts_candidate_matching_constraints() {
        let accepted = accept_candidate(
            ReasonerOutput::Candidate(candidate(30, &["al@example.com", "bo@example.com"])),
            &request(),
        )
        .expect("accepted");
        assert_eq!(accepted.duration(), Duration::minutes(30));
    }

    #[test]
    fn rejects_wrong_duration_missing_attendee_and_wrong_kind() {
        let wrong_duration =
            accept_candidate(ReasonerOutput::Candidate(candidate(45, &["al@example.com"])), &request());
        assert!(matches!(wrong_duration, Err(ReasonerError::Malformed(_))));

        let missing = accept_candidate(ReasonerOutput::Candidate(candidate(30, &[])), &request());
        assert!(matches!(missing, Err(ReasonerError::Malformed(_))));

        let draft = ReasonerOutput::Draft(Draft {
            subject: "hi".to_string(),
            body: "there".to_string(),
        });
        assert!(matches!(
            accept_candidate(draft, &request()),
            Err(ReasonerError::UnexpectedOutput { expected: "candidate", .. })
        ));
    }

    #[test]
    fn blank_drafts_are_errors_not_defaults() {
        let blank = ReasonerOutput::Draft(Draft {
            subject: "Meeting".to_string(),
            body: "  ".to_string(),
        });
        assert_eq!(
            accept_draft(blank),
            Err(ReasonerError::Empty(ReasoningPurpose::DraftMessage))
        );
    }
}
