use crate::calendar::model::Attendee;
use crate::shared::ids::{EventId, IntentId, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    Message,
    CalendarWrite,
}

impl IntentCategory {
    pub fn requires_confirmation(self) -> bool {
        match self {
            IntentCategory::Message | IntentCategory::CalendarWrite => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IntentCategory::Message => "message",
            IntentCategory::CalendarWrite => "calendar_write",
        }
    }
}

impl std::fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Drafted,
    Confirmed,
    Executed,
    Rejected,
}

impl IntentStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (IntentStatus::Drafted, IntentStatus::Confirmed)
                | (IntentStatus::Drafted, IntentStatus::Rejected)
                | (IntentStatus::Confirmed, IntentStatus::Executed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, IntentStatus::Executed | IntentStatus::Rejected)
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntentStatus::Drafted => write!(f, "drafted"),
            IntentStatus::Confirmed => write!(f, "confirmed"),
            IntentStatus::Executed => write!(f, "executed"),
            IntentStatus::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntentPayload {
    Message {
        subject: String,
        body: String,
    },
    CreateEvent {
        title: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        resource: Option<String>,
    },
    MoveEvent {
        event_id: EventId,
        title: String,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
    },
}

impl IntentPayload {
    pub fn category(&self) -> IntentCategory {
        match self {
            IntentPayload::Message { .. } => IntentCategory::Message,
            IntentPayload::CreateEvent { .. } | IntentPayload::MoveEvent { .. } => {
                IntentCategory::CalendarWrite
            }
        }
    }

    pub fn text_fields(&self) -> Vec<&str> {
        match self {
            IntentPayload::Message { subject, body } => vec![subject.as_str(), body.as_str()],
            IntentPayload::CreateEvent {
                title, description, ..
            } => std::iter::once(title.as_str())
                .chain(description.as_deref())
                .collect(),
            IntentPayload::MoveEvent { title, .. } => vec![title.as_str()],
        }
    }

    fn fingerprint(&self) -> String {
        match self {
            IntentPayload::Message { subject, body } => format!("message\0{subject}\0{body}"),
            IntentPayload::CreateEvent {
                title,
                start,
                end,
                description,
                resource,
            } => format!(
                "create\0{title}\0{}\0{}\0{}\0{}",
                start.to_rfc3339(),
                end.to_rfc3339(),
                description.as_deref().unwrap_or_default(),
                resource.as_deref().unwrap_or_default()
            ),
            IntentPayload::MoveEvent {
                event_id,
                new_start,
                new_end,
                ..
            } => format!(
                "move\0{event_id}\0{}\0{}",
                new_start.to_rfc3339(),
                new_end.to_rfc3339()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("intent `{intent_id}` cannot move from `{from}` to `{to}`")]
pub struct IntentTransitionError {
    pub intent_id: IntentId,
    pub from: IntentStatus,
    pub to: IntentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionIntent {
    pub id: IntentId,
    pub category: IntentCategory,
    pub targets: BTreeSet<Attendee>,
    pub payload: IntentPayload,
    status: IntentStatus,
}

impl ActionIntent {
    pub fn draft(run_id: &RunId, targets: BTreeSet<Attendee>, payload: IntentPayload) -> Self {
        let category = payload.category();
        let mut hasher = Sha256::new();
        hasher.update(run_id.as_str().as_bytes());
        hasher.update([0]);
        for target in &targets {
            hasher.update(target.as_str().as_bytes());
            hasher.update([0]);
        }
        hasher.update(payload.fingerprint().as_bytes());
        let digest = hasher.finalize();
        let id = IntentId::sanitized(&format!("intent-{}", &to_hex(&digest)[..12]));
        Self {
            id,
            category,
            targets,
            payload,
            status: IntentStatus::Drafted,
        }
    }

    pub fn status(&self) -> IntentStatus {
        self.status
    }

    pub fn transition(&mut self, next: IntentStatus) -> Result<(), IntentTransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(IntentTransitionError {
                intent_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Read-only copy of an intent as it stood when recorded. Decoding one never
/// yields something the gate accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentRecord {
    pub id: IntentId,
    pub category: IntentCategory,
    pub targets: BTreeSet<Attendee>,
    pub payload: IntentPayload,
    status: IntentStatus,
}

impl IntentRecord {
    pub fn status(&self) -> IntentStatus {
        self.status
    }
}

impl From<&ActionIntent> for IntentRecord {
    fn from(intent: &ActionIntent) -> Self {
        Self {
            id: intent.id.clone(),
            category: intent.category,
            targets: intent.targets.clone(),
            payload: intent.payload.clone(),
            status: intent.status,
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
