//! Read-only access to the remote status store.
//!
//! The tracker never talks HTTP directly; it goes through [`OperationSource`]
//! so tests can drive it with scripted fakes.

pub mod client;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::tracking::record::OperationRecord;

pub use client::StoreClient;

// ─────────────────────────────────────────────────────────────────────────────
// ValidationRunSummary
// ─────────────────────────────────────────────────────────────────────────────

/// Summary row of a validation run, read from the secondary status source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRunSummary {
    #[serde(default, alias = "extract_status")]
    pub extract_status: Option<String>,
    #[serde(default, alias = "validation_status")]
    pub validation_status: Option<String>,
    #[serde(default, alias = "completed_count")]
    pub completed_count: u64,
    #[serde(default, alias = "total_requirement_count")]
    pub total_requirement_count: u64,
}

impl ValidationRunSummary {
    /// Share of requirements completed, 0 when there are none.
    pub fn requirement_progress(&self) -> u8 {
        if self.total_requirement_count == 0 {
            return 0;
        }
        let done = self.completed_count.min(self.total_requirement_count);
        (done * 100 / self.total_requirement_count) as u8
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OperationSource
// ─────────────────────────────────────────────────────────────────────────────

/// Boxed future returned by [`OperationSource`] methods.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AppError>> + Send + 'a>>;

/// Source of per-run status data.
pub trait OperationSource: Send + Sync {
    /// Fetches every operation record of the run, oldest first.
    fn list_operations<'a>(&'a self, run_id: &'a str) -> SourceFuture<'a, Vec<OperationRecord>>;

    /// Fetches the run summary. `Ok(None)` means the source does not offer one.
    fn run_summary<'a>(&'a self, run_id: &'a str)
        -> SourceFuture<'a, Option<ValidationRunSummary>>;
}
