//! Run progress tracking.
//!
//! - [`record`] - operation records as read from the store
//! - [`aggregate`] - counts, aggregate progress, current operation selection
//! - [`stage`] - display stage inference and step flags
//! - [`session`] - per-run latches and the published view
//! - [`tracker`] - the timer-driven poll loop and its cancellation handle

pub mod aggregate;
pub mod record;
pub mod session;
pub mod stage;
pub mod tracker;

pub use aggregate::{
    active_operations, select_current, CurrentOperation, FailureSummary, ProgressSnapshot,
    RunAggregate,
};
pub use record::{OperationRecord, OperationStatus};
pub use session::{NoopListener, ProgressView, RunListener, ViewPhase};
pub use stage::{resolve_stage, step_marks, ProgressDialog, Stage, StepMark};
pub use tracker::{start, ProgressTracker, SessionHandle};
