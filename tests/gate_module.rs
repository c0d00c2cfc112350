use chrono::{TimeZone, Utc};
use chronos::calendar::attendee_set;
use chronos::gate::{
    ActionGate, ActionIntent, AllowList, ConfirmationSource, GateRejection, GateResult,
    IntentPayload, IntentRecord, IntentStatus, OutboxExecutor, RecordingExecutor,
};
use chronos::shared::ids::RunId;
use std::sync::atomic::AtomicBool;

fn allow_list() -> AllowList {
    AllowList::from_attendees(attendee_set(["al@example.com", "bo@example.com"]).expect("attendees"))
}

fn message(body: &str) -> ActionIntent {
    ActionIntent::draft(
        &RunId::parse("run-gate").expect("run id"),
        attendee_set(["al@example.com"]).expect("targets"),
        IntentPayload::Message {
            subject: "Design review".to_string(),
            body: body.to_string(),
        },
    )
}

fn create_event() -> ActionIntent {
    ActionIntent::draft(
        &RunId::parse("run-gate").expect("run id"),
        attendee_set(["al@example.com", "bo@example.com"]).expect("targets"),
        IntentPayload::CreateEvent {
            title: "Design review".to_string(),
            start: Utc.with_ymd_and_hms(2025, 3, 3, 14, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 3, 3, 15, 0, 0).unwrap(),
            description: None,
            resource: None,
        },
    )
}

#[test]
fn gate_module_rejects_mentions_outside_the_allow_list_without_executing() {
    let gate = ActionGate::new(allow_list(), false);
    let executor = RecordingExecutor::new();
    let cancel = AtomicBool::new(false);
    let mut intent = message("Hi Al, looping in mallory@evil.example for notes.");

    let rejection = gate
        .confirm(&mut intent, ConfirmationSource::Caller)
        .expect_err("outsider mention");
    assert!(matches!(
        &rejection,
        GateRejection::MentionsOutsideAllowList { mentions, .. }
            if mentions == &vec!["mallory@evil.example".to_string()]
    ));
    assert_eq!(intent.status(), IntentStatus::Rejected);

    let result = gate.submit(&mut intent, None, &executor, &cancel);
    assert!(matches!(
        result,
        GateResult::Rejected {
            rejection: GateRejection::MentionsOutsideAllowList { .. }
        }
    ));
    assert_eq!(executor.call_count(), 0);
}

#[test]
fn gate_module_rejects_targets_outside_the_allow_list() {
    let gate = ActionGate::new(allow_list(), false);
    let mut intent = ActionIntent::draft(
        &RunId::parse("run-gate").expect("run id"),
        attendee_set(["al@example.com", "zed@example.com"]).expect("targets"),
        IntentPayload::Message {
            subject: "Hello".to_string(),
            body: "Quick sync?".to_string(),
        },
    );

    let rejection = gate
        .confirm(&mut intent, ConfirmationSource::Caller)
        .expect_err("outsider target");
    assert!(matches!(
        rejection,
        GateRejection::TargetsOutsideAllowList { ref attendees, .. }
            if attendees == &vec!["zed@example.com".to_string()]
    ));
}

#[test]
fn gate_module_requires_a_confirmation_for_this_intent() {
    let gate = ActionGate::new(allow_list(), false);
    let executor = RecordingExecutor::new();
    let cancel = AtomicBool::new(false);

    let mut unconfirmed = create_event();
    let result = gate.submit(&mut unconfirmed, None, &executor, &cancel);
    assert!(matches!(
        result,
        GateResult::Rejected {
            rejection: GateRejection::MissingConfirmation { .. }
        }
    ));
    assert_eq!(unconfirmed.status(), IntentStatus::Rejected);

    let mut other = message("See you there.");
    let foreign = gate
        .confirm(&mut other, ConfirmationSource::Caller)
        .expect("confirm other");
    let mut target = create_event();
    let result = gate.submit(&mut target, Some(&foreign), &executor, &cancel);
    assert!(matches!(
        result,
        GateResult::Rejected {
            rejection: GateRejection::MissingConfirmation { .. }
        }
    ));
    assert_eq!(executor.call_count(), 0);
}

#[test]
fn gate_module_executes_confirmed_intents_once() {
    let gate = ActionGate::new(allow_list(), false);
    let executor = RecordingExecutor::new();
    let cancel = AtomicBool::new(false);
    let mut intent = create_event();

    let confirmation = gate
        .confirm(&mut intent, ConfirmationSource::Caller)
        .expect("confirm");
    assert_eq!(confirmation.intent_id(), &intent.id);
    let result = gate.submit(&mut intent, Some(&confirmation), &executor, &cancel);

    assert!(matches!(result, GateResult::Executed { .. }));
    assert_eq!(intent.status(), IntentStatus::Executed);
    let executed = executor.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].id, intent.id);

    let again = gate
        .confirm(&mut intent, ConfirmationSource::Caller)
        .expect_err("already executed");
    assert!(matches!(again, GateRejection::NotDrafted { .. }));
}

#[test]
fn gate_module_dry_run_records_effects_instead_of_executing() {
    let gate = ActionGate::new(allow_list(), true);
    assert!(gate.is_dry_run());
    let executor = RecordingExecutor::new();
    let cancel = AtomicBool::new(false);
    let mut intent = create_event();
    let confirmation = gate
        .confirm(&mut intent, ConfirmationSource::Caller)
        .expect("confirm");

    let result = gate.submit(&mut intent, Some(&confirmation), &executor, &cancel);
    match result {
        GateResult::DryRun { effect } => {
            assert_eq!(effect.intent_id, intent.id);
            assert_eq!(effect.payload, intent.payload);
        }
        other => panic!("expected dry run, got {other:?}"),
    }
    assert_eq!(executor.call_count(), 0);
    assert_eq!(intent.status(), IntentStatus::Confirmed);
}

#[test]
fn gate_module_dry_run_still_validates_recipients() {
    let gate = ActionGate::new(allow_list(), true);
    let executor = RecordingExecutor::new();
    let cancel = AtomicBool::new(false);
    let mut intent = message("cc eve@elsewhere.example");

    let result = gate.submit(&mut intent, None, &executor, &cancel);
    assert!(matches!(
        result,
        GateResult::Rejected {
            rejection: GateRejection::MentionsOutsideAllowList { .. }
        }
    ));
    assert_eq!(executor.call_count(), 0);
}

#[test]
fn gate_module_skips_submissions_after_cancellation() {
    let gate = ActionGate::new(allow_list(), false);
    let executor = RecordingExecutor::new();
    let cancel = AtomicBool::new(true);
    let mut intent = create_event();
    let confirmation = gate
        .confirm(&mut intent, ConfirmationSource::Caller)
        .expect("confirm");

    let result = gate.submit(&mut intent, Some(&confirmation), &executor, &cancel);
    assert_eq!(result, GateResult::Skipped);
    assert_eq!(intent.status(), IntentStatus::Confirmed);
    assert_eq!(executor.call_count(), 0);
}

#[test]
fn gate_module_outbox_executor_writes_one_file_per_intent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gate = ActionGate::new(allow_list(), false);
    let executor = OutboxExecutor::new(dir.path());
    let cancel = AtomicBool::new(false);
    let mut intent = create_event();
    let confirmation = gate
        .confirm(&mut intent, ConfirmationSource::Caller)
        .expect("confirm");

    let result = gate.submit(&mut intent, Some(&confirmation), &executor, &cancel);
    assert!(matches!(result, GateResult::Executed { .. }));
    let written = dir.path().join(format!("{}.json", intent.id));
    let raw = std::fs::read_to_string(&written).expect("outbox file");
    let stored: IntentRecord = serde_json::from_str(&raw).expect("decode");
    assert_eq!(stored.id, intent.id);
    assert_eq!(stored.payload, intent.payload);
    assert_eq!(stored.status(), IntentStatus::Confirmed);
}
