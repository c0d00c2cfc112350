use crate::calendar::model::{Attendee, CalendarSnapshot, Request, TimeWindow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Recipients the run may address: the request's explicit attendees plus
/// attendees of calendar events overlapping the final slot. Free text never
/// adds to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowList {
    attendees: BTreeSet<Attendee>,
}

impl AllowList {
    pub fn derive(request: &Request, snapshot: &CalendarSnapshot, relevant: TimeWindow) -> Self {
        let mut attendees = request.constraints.attendees.clone();
        for event in snapshot.events_overlapping(relevant) {
            attendees.extend(event.attendees.iter().cloned());
        }
        Self { attendees }
    }

    pub fn from_attendees(attendees: impl IntoIterator<Item = Attendee>) -> Self {
        Self {
            attendees: attendees.into_iter().collect(),
        }
    }

    pub fn contains(&self, attendee: &Attendee) -> bool {
        self.attendees.contains(attendee)
    }

    pub fn len(&self) -> usize {
        self.attendees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attendees.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attendee> {
        self.attendees.iter()
    }

    pub fn outsiders<'a>(&self, targets: impl IntoIterator<Item = &'a Attendee>) -> Vec<Attendee> {
        targets
            .into_iter()
            .filter(|attendee| !self.contains(attendee))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn unlisted_mentions(&self, text: &str) -> Vec<String> {
        email_mentions(text)
            .into_iter()
            .filter(|mention| {
                Attendee::parse(mention)
                    .map(|attendee| !self.contains(&attendee))
                    .unwrap_or(true)
            })
            .collect()
    }
}

fn is_local_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'%' | b'+' | b'-')
}

fn is_domain_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'-')
}

fn domain_match_len(domain: &[u8]) -> Option<usize> {
    (1..=domain.len()).rev().find(|&end| {
        let candidate = &domain[..end];
        match candidate.iter().rposition(|byte| *byte == b'.') {
            Some(dot) if dot > 0 => {
                let tld = &candidate[dot + 1..];
                tld.len() >= 2 && tld.iter().all(u8::is_ascii_alphabetic)
            }
            _ => false,
        }
    })
}

pub fn email_mentions(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut found: Vec<String> = Vec::new();
    let mut cursor = 0;
    while let Some(offset) = bytes[cursor..].iter().position(|byte| *byte == b'@') {
        let at = cursor + offset;
        cursor = at + 1;

        let local_start = bytes[..at]
            .iter()
            .rposition(|byte| !is_local_byte(*byte))
            .map(|idx| idx + 1)
            .unwrap_or(0);
        if local_start == at {
            continue;
        }
        let domain_end = bytes[at + 1..]
            .iter()
            .position(|byte| !is_domain_byte(*byte))
            .map(|idx| at + 1 + idx)
            .unwrap_or(bytes.len());
        let Some(domain_len) = domain_match_len(&bytes[at + 1..domain_end]) else {
            continue;
        };
        let end = at + 1 + domain_len;
        let mention = text[local_start..end].to_ascii_lowercase();
        if !found.contains(&mention) {
            found.push(mention);
        }
        cursor = end;
    }
    found
}
