//! Aggregation over one poll's worth of operation records.
//!
//! Everything here is a pure function of the record slice it is given. Callers
//! are expected to pass records already sorted into creation order (see
//! [`sort_by_creation`](super::record::sort_by_creation)); "first" always means
//! earliest created.

use serde::Serialize;

use super::record::{OperationRecord, OperationStatus};

/// Message used when a failing record carries no error text.
pub const GENERIC_FAILURE_MESSAGE: &str = "An operation failed without reporting an error";

// ─────────────────────────────────────────────────────────────────────────────
// RunAggregate
// ─────────────────────────────────────────────────────────────────────────────

/// Counts derived fresh from the current record set of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAggregate {
    pub total: usize,
    pub completed: usize,
    /// `failed` plus `timeout`.
    pub failed: usize,
    /// `processing` plus `pending` (and unrecognised statuses).
    pub processing: usize,
    /// `floor(completed / total * 100)`.
    pub aggregate_progress: u8,
}

impl RunAggregate {
    /// Computes the aggregate, or `None` when the run has no records yet.
    pub fn compute(records: &[OperationRecord]) -> Option<Self> {
        if records.is_empty() {
            return None;
        }

        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut processing = 0usize;

        for record in records {
            match record.status {
                OperationStatus::Completed => completed += 1,
                OperationStatus::Failed | OperationStatus::Timeout => failed += 1,
                OperationStatus::Pending
                | OperationStatus::Processing
                | OperationStatus::Unknown => processing += 1,
            }
        }

        let total = records.len();
        let aggregate_progress = (completed * 100 / total) as u8;

        Some(Self {
            total,
            completed,
            failed,
            processing,
            aggregate_progress,
        })
    }

    /// True once every job reached `completed`.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }

    /// True while at least one job failed and the run is not all-complete.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 && !self.is_complete()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Selection
// ─────────────────────────────────────────────────────────────────────────────

/// Picks the record to show in detail: the first `processing` record, falling
/// back to the first record overall.
pub fn select_current(records: &[OperationRecord]) -> Option<&OperationRecord> {
    records
        .iter()
        .find(|r| r.status == OperationStatus::Processing)
        .or_else(|| records.first())
}

/// All `processing` records, earliest created first.
pub fn active_operations(records: &[OperationRecord]) -> Vec<&OperationRecord> {
    records
        .iter()
        .filter(|r| r.status == OperationStatus::Processing)
        .collect()
}

/// The earliest created `failed`/`timeout` record.
pub fn first_failure(records: &[OperationRecord]) -> Option<&OperationRecord> {
    records.iter().find(|r| r.status.is_failure())
}

/// Message reported for a run's failure notification.
pub fn failure_message(records: &[OperationRecord]) -> String {
    first_failure(records)
        .and_then(OperationRecord::failure_message)
        .unwrap_or(GENERIC_FAILURE_MESSAGE)
        .to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot types
// ─────────────────────────────────────────────────────────────────────────────

/// Detail view of the job surfaced as "current".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentOperation {
    pub id: String,
    pub name: String,
    pub status: OperationStatus,
    pub progress: u8,
    pub elapsed_ms: u64,
    pub max_wait_ms: u64,
    pub remaining_ms: u64,
}

impl From<&OperationRecord> for CurrentOperation {
    fn from(record: &OperationRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.operation_name.clone(),
            status: record.status,
            progress: record.progress(),
            elapsed_ms: record.elapsed_ms(),
            max_wait_ms: record.max_wait_ms(),
            remaining_ms: record.remaining_ms(),
        }
    }
}

/// Failure summary rendered alongside the progress bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureSummary {
    pub failed_count: usize,
    pub first_message: String,
}

/// Read-only snapshot of a run, refreshed every poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub aggregate_progress: u8,
    pub completed_count: usize,
    pub total_count: usize,
    pub failed_count: usize,
    pub processing_count: usize,
    pub current_operation: Option<CurrentOperation>,
    pub failure: Option<FailureSummary>,
}

impl ProgressSnapshot {
    /// Builds the snapshot for a non-empty record set.
    pub fn from_records(records: &[OperationRecord]) -> Option<Self> {
        let aggregate = RunAggregate::compute(records)?;

        let failure = (aggregate.failed > 0).then(|| FailureSummary {
            failed_count: aggregate.failed,
            first_message: failure_message(records),
        });

        Some(Self {
            aggregate_progress: aggregate.aggregate_progress,
            completed_count: aggregate.completed,
            total_count: aggregate.total,
            failed_count: aggregate.failed,
            processing_count: aggregate.processing,
            current_operation: select_current(records).map(CurrentOperation::from),
            failure,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
