use crate::calendar::model::Candidate;
use chrono::{DateTime, Duration, Utc};

pub fn format_duration(duration: Duration) -> String {
    let minutes = duration.num_minutes().max(0);
    if minutes < 60 {
        return format!("{minutes}m");
    }
    let hours = minutes / 60;
    let rest = minutes % 60;
    if rest == 0 {
        format!("{hours}h")
    } else {
        format!("{hours}h {rest}m")
    }
}

pub fn format_instant(at: DateTime<Utc>) -> String {
    at.format("%a %Y-%m-%d %H:%M UTC").to_string()
}

fn title_or_untitled(title: &str) -> &str {
    if title.trim().is_empty() {
        "Untitled meeting"
    } else {
        title.trim()
    }
}

pub fn candidate_details(candidate: &Candidate) -> String {
    let mut lines = vec![
        format!("Title: {}", title_or_untitled(&candidate.title)),
        format!(
            "Time: {} to {}",
            format_instant(candidate.start),
            candidate.end.format("%H:%M UTC")
        ),
        format!("Duration: {}", format_duration(candidate.duration())),
    ];
    if !candidate.attendees.is_empty() {
        let attendees = candidate
            .attendees
            .iter()
            .map(|attendee| attendee.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("Attendees: {attendees}"));
    }
    if let Some(resource) = candidate.resource.as_deref() {
        lines.push(format!("Resource: {resource}"));
    }
    lines.join("\n")
}
