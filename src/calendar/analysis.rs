use crate::calendar::model::CalendarSnapshot;
use crate::shared::ids::EventId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisParams {
    pub tight_gap: Duration,
    pub working_day: Duration,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            tight_gap: Duration::minutes(5),
            working_day: Duration::minutes(480),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarMetrics {
    pub total_events: usize,
    pub busy_minutes: i64,
    pub free_minutes: i64,
    pub utilization_percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TightScheduleAdvisory {
    pub first_event_id: EventId,
    pub second_event_id: EventId,
    pub gap_minutes: i64,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarAnalysis {
    pub metrics: CalendarMetrics,
    #[serde(default)]
    pub advisories: Vec<TightScheduleAdvisory>,
}

pub fn analyze_snapshot(snapshot: &CalendarSnapshot, params: &AnalysisParams) -> CalendarAnalysis {
    CalendarAnalysis {
        metrics: calendar_metrics(snapshot, params),
        advisories: tight_schedule_advisories(snapshot, params),
    }
}

pub fn calendar_metrics(snapshot: &CalendarSnapshot, params: &AnalysisParams) -> CalendarMetrics {
    let events = snapshot.events();
    let mut busy = 0_i64;
    let mut current: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
    for event in events {
        current = match current {
            Some((start, end)) if event.start <= end => Some((start, end.max(event.end))),
            Some((start, end)) => {
                busy += (end - start).num_minutes();
                Some((event.start, event.end))
            }
            None => Some((event.start, event.end)),
        };
    }
    if let Some((start, end)) = current {
        busy += (end - start).num_minutes();
    }

    let day = params.working_day.num_minutes().max(0);
    let utilization_percent = if day == 0 {
        0
    } else {
        u32::try_from((busy * 100 / day).clamp(0, 100)).unwrap_or(100)
    };
    CalendarMetrics {
        total_events: events.len(),
        busy_minutes: busy,
        free_minutes: (day - busy).max(0),
        utilization_percent,
    }
}

pub fn tight_schedule_advisories(
    snapshot: &CalendarSnapshot,
    params: &AnalysisParams,
) -> Vec<TightScheduleAdvisory> {
    snapshot
        .events()
        .windows(2)
        .filter_map(|pair| {
            let (first, second) = (&pair[0], &pair[1]);
            let gap = second.start - first.end;
            if gap < Duration::zero() || gap >= params.tight_gap {
                return None;
            }
            let gap_minutes = gap.num_minutes();
            Some(TightScheduleAdvisory {
                first_event_id: first.id.clone(),
                second_event_id: second.id.clone(),
                gap_minutes,
                message: format!(
                    "only {gap_minutes}m between `{}` and `{}`",
                    first.title, second.title
                ),
            })
        })
        .collect()
}
