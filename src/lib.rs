//! Progress tracking for multi-job processing runs.
//!
//! A run is a batch of asynchronous jobs whose status records live in a remote
//! store. [`ProgressTracker`] polls that store on a fixed interval, folds the
//! records into one aggregate progress value, infers the run's display stage,
//! and tells a [`RunListener`] exactly once when the run completes or first
//! fails.

pub mod config;
pub mod error;
pub mod logging;
pub mod store;
pub mod tracking;

pub use config::{StoreConfig, TrackerOptions};
pub use error::{AppError, ErrorPresentation};
pub use store::{OperationSource, StoreClient, ValidationRunSummary};
pub use tracking::{
    ProgressDialog, ProgressSnapshot, ProgressTracker, ProgressView, RunListener, SessionHandle,
    Stage, ViewPhase,
};
