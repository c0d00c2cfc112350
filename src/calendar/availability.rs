use crate::calendar::loader::FetchError;
use crate::calendar::model::{Request, TimeWindow};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

pub const DEFAULT_WORKDAY_START_HOUR: u32 = 9;
pub const DEFAULT_WORKDAY_END_HOUR: u32 = 17;
pub const DEFAULT_TIMEZONE: &str = "UTC";

pub fn parse_iana_timezone(raw: &str) -> Result<Tz, String> {
    raw.parse::<Tz>()
        .map_err(|_| format!("invalid timezone `{raw}`; expected IANA timezone id"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingHours {
    start_hour: u32,
    end_hour: u32,
    timezone: Tz,
}

impl WorkingHours {
    pub fn new(start_hour: u32, end_hour: u32, timezone: &str) -> Result<Self, String> {
        if end_hour > 24 || start_hour >= end_hour {
            return Err(format!(
                "working hours {start_hour}..{end_hour} must satisfy start < end <= 24"
            ));
        }
        Ok(Self {
            start_hour,
            end_hour,
            timezone: parse_iana_timezone(timezone)?,
        })
    }

    pub fn start_hour(&self) -> u32 {
        self.start_hour
    }

    pub fn end_hour(&self) -> u32 {
        self.end_hour
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn with_timezone(self, timezone: Tz) -> Self {
        Self { timezone, ..self }
    }

    pub fn window_on(&self, date: NaiveDate) -> Option<TimeWindow> {
        let midnight = date.and_hms_opt(0, 0, 0)?;
        let open = self.to_utc(midnight + Duration::hours(i64::from(self.start_hour)))?;
        let close = self.to_utc(midnight + Duration::hours(i64::from(self.end_hour)))?;
        TimeWindow::new(open, close).ok()
    }

    pub fn contains(&self, window: &TimeWindow) -> bool {
        let date = window.start().with_timezone(&self.timezone).date_naive();
        self.window_on(date)
            .map(|day| day.contains(window))
            .unwrap_or(false)
    }

    pub fn windows_within(&self, horizon: &TimeWindow) -> Vec<TimeWindow> {
        let first = horizon.start().with_timezone(&self.timezone).date_naive();
        let last = horizon.end().with_timezone(&self.timezone).date_naive();
        first
            .iter_days()
            .take_while(|date| *date <= last)
            .filter_map(|date| self.window_on(date))
            .filter_map(|day| day.intersection(horizon))
            .collect()
    }

    fn to_utc(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.timezone
            .from_local_datetime(&local)
            .earliest()
            .map(|at| at.with_timezone(&Utc))
    }
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self {
            start_hour: DEFAULT_WORKDAY_START_HOUR,
            end_hour: DEFAULT_WORKDAY_END_HOUR,
            timezone: Tz::UTC,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityReport {
    pub timezone: String,
    pub working_windows: Vec<TimeWindow>,
}

impl AvailabilityReport {
    pub fn working_minutes(&self) -> i64 {
        self.working_windows
            .iter()
            .map(|window| window.duration().num_minutes())
            .sum()
    }
}

pub trait AvailabilityProbe: Send + Sync {
    fn check(&self, request: &Request, horizon: TimeWindow) -> Result<AvailabilityReport, FetchError>;
}

#[derive(Debug, Clone, Default)]
pub struct WorkingHoursProbe {
    hours: WorkingHours,
}

impl WorkingHoursProbe {
    pub fn new(hours: WorkingHours) -> Self {
        Self { hours }
    }
}

impl AvailabilityProbe for WorkingHoursProbe {
    fn check(&self, request: &Request, horizon: TimeWindow) -> Result<AvailabilityReport, FetchError> {
        let hours = match request.constraints.timezone.as_deref() {
            Some(raw) => self
                .hours
                .with_timezone(parse_iana_timezone(raw).map_err(FetchError::Malformed)?),
            None => self.hours,
        };
        Ok(AvailabilityReport {
            timezone: hours.timezone().name().to_string(),
            working_windows: hours.windows_within(&horizon),
        })
    }
}
