pub mod engine;
pub mod error;
pub mod handle;
pub mod journal;
pub mod outcome;
pub mod progress;
pub mod run_state;
pub mod stage;

pub use engine::{Collaborators, Orchestrator, RunOptions};
pub use error::{ErrorKind, OrchestratorError, RunError};
pub use handle::RunHandle;
pub use journal::{load_outcome, load_progress, RunJournal};
pub use outcome::{render_summary, RunOutcome, SubmissionRecord};
pub use progress::{IntentStatusEntry, StageDelta, StageEvent, StageEvents};
pub use run_state::RunState;
pub use stage::{Stage, Trigger};
