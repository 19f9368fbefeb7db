//! Status records produced by background jobs of a validation run.
//!
//! The remote store owns these rows; this module only decodes them. Decoding is
//! lenient: missing numeric fields fall back to display defaults and unknown
//! status strings map to [`OperationStatus::Unknown`] instead of failing the
//! whole poll.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Display budget used when a record carries no `maxWaitTimeMs` (5 minutes).
pub const DEFAULT_MAX_WAIT_MS: u64 = 300_000;

// ─────────────────────────────────────────────────────────────────────────────
// OperationStatus
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a single background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Timeout,
    /// Any status string this client does not recognise.
    #[serde(other)]
    Unknown,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Processing => "processing",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Timeout => "timeout",
            OperationStatus::Unknown => "unknown",
        }
    }

    /// Returns true for `failed` and `timeout`.
    pub fn is_failure(&self) -> bool {
        matches!(self, OperationStatus::Failed | OperationStatus::Timeout)
    }

    /// Returns true if the job cannot transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Timeout
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OperationRecord
// ─────────────────────────────────────────────────────────────────────────────

/// One row per background job tied to a validation run.
///
/// Accepts both camelCase and snake_case keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub id: String,
    #[serde(default, alias = "operation_name")]
    pub operation_name: String,
    pub status: OperationStatus,
    #[serde(default, alias = "progress_percentage")]
    pub progress_percentage: Option<u32>,
    #[serde(default, alias = "elapsed_time_ms")]
    pub elapsed_time_ms: Option<u64>,
    #[serde(default, alias = "max_wait_time_ms")]
    pub max_wait_time_ms: Option<u64>,
    #[serde(default, alias = "error_message")]
    pub error_message: Option<String>,
    #[serde(default, alias = "created_at")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "started_at")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "updated_at")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl OperationRecord {
    /// Advisory progress clamped to 0–100; missing counts as 0.
    pub fn progress(&self) -> u8 {
        self.progress_percentage.unwrap_or(0).min(100) as u8
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_time_ms.unwrap_or(0)
    }

    /// Soft wait budget. Never enforced, only displayed.
    pub fn max_wait_ms(&self) -> u64 {
        self.max_wait_time_ms.unwrap_or(DEFAULT_MAX_WAIT_MS)
    }

    /// Time left in the soft budget, zero once it is exceeded.
    pub fn remaining_ms(&self) -> u64 {
        self.max_wait_ms().saturating_sub(self.elapsed_ms())
    }

    /// Non-empty error message, if any.
    pub fn failure_message(&self) -> Option<&str> {
        self.error_message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }
}

/// Orders records by creation time; records without a timestamp sort last.
fn creation_order(a: &OperationRecord, b: &OperationRecord) -> Ordering {
    match (a.created_at, b.created_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Sorts records into creation order in place.
///
/// The sort is stable, so records with equal (or missing) timestamps keep the
/// order the store returned them in.
pub fn sort_by_creation(records: &mut [OperationRecord]) {
    records.sort_by(creation_order);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
