use crate::calendar::model::Attendee;
use crate::shared::ids::IntentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

pub mod allow_list;
pub mod dispatch;
pub mod executor;
pub mod intent;

pub use allow_list::{email_mentions, AllowList};
pub use executor::{ExecutionError, ExecutionReceipt, Executor, OutboxExecutor, RecordingExecutor};
pub use intent::{
    ActionIntent, IntentCategory, IntentPayload, IntentRecord, IntentStatus, IntentTransitionError,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum GateRejection {
    #[error("intent `{intent_id}` targets attendees outside the allow-list: {}", .attendees.join(", "))]
    TargetsOutsideAllowList {
        intent_id: IntentId,
        attendees: Vec<String>,
    },
    #[error("intent `{intent_id}` mentions recipients outside the allow-list: {}", .mentions.join(", "))]
    MentionsOutsideAllowList {
        intent_id: IntentId,
        mentions: Vec<String>,
    },
    #[error("intent `{intent_id}` has no explicit confirmation")]
    MissingConfirmation { intent_id: IntentId },
    #[error("intent `{intent_id}` is `{status}`; only drafted intents can be confirmed")]
    NotDrafted {
        intent_id: IntentId,
        status: IntentStatus,
    },
}

impl GateRejection {
    pub fn intent_id(&self) -> &IntentId {
        match self {
            GateRejection::TargetsOutsideAllowList { intent_id, .. }
            | GateRejection::MentionsOutsideAllowList { intent_id, .. }
            | GateRejection::MissingConfirmation { intent_id }
            | GateRejection::NotDrafted { intent_id, .. } => intent_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationSource {
    Caller,
    AutoLowRisk,
}

/// Proof that one specific intent was confirmed. Only [`ActionGate::confirm`]
/// mints these, and each covers exactly one intent id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    intent_id: IntentId,
    source: ConfirmationSource,
    confirmed_at: DateTime<Utc>,
}

impl Confirmation {
    pub fn intent_id(&self) -> &IntentId {
        &self.intent_id
    }

    pub fn source(&self) -> ConfirmationSource {
        self.source
    }

    pub fn confirmed_at(&self) -> DateTime<Utc> {
        self.confirmed_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunEffect {
    pub intent_id: IntentId,
    pub category: IntentCategory,
    pub targets: BTreeSet<Attendee>,
    pub payload: IntentPayload,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GateResult {
    Executed { receipt: ExecutionReceipt },
    DryRun { effect: DryRunEffect },
    Rejected { rejection: GateRejection },
    Failed { error: ExecutionError },
    Skipped,
}

impl GateResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateResult::Executed { .. } => "executed",
            GateResult::DryRun { .. } => "dry_run",
            GateResult::Rejected { .. } => "rejected",
            GateResult::Failed { .. } => "failed",
            GateResult::Skipped => "skipped",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, GateResult::Executed { .. } | GateResult::DryRun { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ActionGate {
    allow_list: AllowList,
    dry_run: bool,
}

impl ActionGate {
    pub fn new(allow_list: AllowList, dry_run: bool) -> Self {
        Self {
            allow_list,
            dry_run,
        }
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn validate_recipients(&self, intent: &ActionIntent) -> Result<(), GateRejection> {
        let outsiders = self.allow_list.outsiders(&intent.targets);
        if !outsiders.is_empty() {
            return Err(GateRejection::TargetsOutsideAllowList {
                intent_id: intent.id.clone(),
                attendees: outsiders.iter().map(|a| a.as_str().to_string()).collect(),
            });
        }
        let mut mentions = Vec::new();
        for text in intent.payload.text_fields() {
            for mention in self.allow_list.unlisted_mentions(text) {
                if !mentions.contains(&mention) {
                    mentions.push(mention);
                }
            }
        }
        if !mentions.is_empty() {
            return Err(GateRejection::MentionsOutsideAllowList {
                intent_id: intent.id.clone(),
                mentions,
            });
        }
        Ok(())
    }

    pub fn confirm(
        &self,
        intent: &mut ActionIntent,
        source: ConfirmationSource,
    ) -> Result<Confirmation, GateRejection> {
        if intent.status() != IntentStatus::Drafted {
            return Err(GateRejection::NotDrafted {
                intent_id: intent.id.clone(),
                status: intent.status(),
            });
        }
        if let Err(rejection) = self.validate_recipients(intent) {
            reject_quietly(intent);
            return Err(rejection);
        }
        intent
            .transition(IntentStatus::Confirmed)
            .map_err(|err| GateRejection::NotDrafted {
                intent_id: err.intent_id,
                status: err.from,
            })?;
        Ok(Confirmation {
            intent_id: intent.id.clone(),
            source,
            confirmed_at: Utc::now(),
        })
    }

    /// Validates, then executes or records the intent. Checks run in order:
    /// recipients, then confirmation. `cancel` is consulted once, before
    /// validation; a submission past validation always runs to completion.
    pub fn submit(
        &self,
        intent: &mut ActionIntent,
        confirmation: Option<&Confirmation>,
        executor: &dyn Executor,
        cancel: &AtomicBool,
    ) -> GateResult {
        if cancel.load(Ordering::SeqCst) {
            return GateResult::Skipped;
        }
        if let Err(rejection) = self.validate_recipients(intent) {
            reject_quietly(intent);
            return GateResult::Rejected { rejection };
        }
        let confirmed = intent.status() == IntentStatus::Confirmed
            && confirmation
                .map(|proof| proof.intent_id == intent.id)
                .unwrap_or(false);
        if !confirmed {
            reject_quietly(intent);
            return GateResult::Rejected {
                rejection: GateRejection::MissingConfirmation {
                    intent_id: intent.id.clone(),
                },
            };
        }

        if self.dry_run {
            return GateResult::DryRun {
                effect: DryRunEffect {
                    intent_id: intent.id.clone(),
                    category: intent.category,
                    targets: intent.targets.clone(),
                    payload: intent.payload.clone(),
                    recorded_at: Utc::now(),
                },
            };
        }

        match executor.execute(intent) {
            Ok(receipt) => match intent.transition(IntentStatus::Executed) {
                Ok(()) => GateResult::Executed { receipt },
                Err(err) => GateResult::Failed {
                    error: ExecutionError::StatusUpdate {
                        intent_id: intent.id.clone(),
                        reason: err.to_string(),
                    },
                },
            },
            Err(error) => GateResult::Failed { error },
        }
    }
}

fn reject_quietly(intent: &mut ActionIntent) {
    if intent.status().can_transition_to(IntentStatus::Rejected) {
        let _ = intent.transition(IntentStatus::Rejected);
    }
}
