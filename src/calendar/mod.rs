pub mod analysis;
pub mod availability;
pub mod conflict;
pub mod format;
pub mod loader;
pub mod model;
pub mod resolution;

pub use analysis::{analyze_snapshot, AnalysisParams, CalendarAnalysis, CalendarMetrics};
pub use availability::{AvailabilityProbe, AvailabilityReport, WorkingHours, WorkingHoursProbe};
pub use conflict::{detect_conflicts, has_conflict, is_slot_free, Conflict};
pub use loader::{FetchError, RetryPolicy, SnapshotLoader, StaticSnapshotLoader};
pub use model::{
    attendee_set, Attendee, CalendarSnapshot, Candidate, Event, Priority, Request,
    RequestConstraints, TimeWindow,
};
pub use resolution::{
    plan_resolutions, PlannerParams, ResolutionAction, ResolutionOption, ResolutionStrategy,
};
