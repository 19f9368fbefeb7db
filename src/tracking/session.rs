//! Per-run tracking state: latches, the published view, and the listener
//! contract.
//!
//! [`RunSession`] is synchronous and owns no timer; the poll loop in
//! [`tracker`](super::tracker) feeds it fetch results. Keeping the state
//! machine free of I/O lets every latch rule be tested poll by poll.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{AppError, ErrorPresentation};
use crate::store::client::redact_id;
use crate::store::ValidationRunSummary;

use super::aggregate::{failure_message, ProgressSnapshot, RunAggregate};
use super::record::{sort_by_creation, OperationRecord};
use super::stage::{resolve_stage, ProgressDialog, Stage};

// ─────────────────────────────────────────────────────────────────────────────
// Listener
// ─────────────────────────────────────────────────────────────────────────────

/// Receives terminal notifications of a tracked run.
///
/// Methods are invoked synchronously on the poll task, so they must return
/// quickly. They may cancel or drop the
/// [`SessionHandle`](super::tracker::SessionHandle) of the same run; nothing
/// further is delivered once that returns.
pub trait RunListener: Send + Sync {
    /// Every job of the run completed. Fired at most once per run.
    fn on_complete(&self) {}

    /// At least one job failed or timed out before the run completed. Fired at
    /// most once per run.
    fn on_error(&self, _message: &str) {}

    /// A new view was published (every poll and every fetch error).
    fn on_view(&self, _view: &ProgressView) {}
}

/// Listener that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl RunListener for NoopListener {}

// ─────────────────────────────────────────────────────────────────────────────
// ProgressView
// ─────────────────────────────────────────────────────────────────────────────

/// What the consumer should render for the run body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "snapshot", rename_all = "camelCase")]
pub enum ViewPhase {
    /// No poll has succeeded yet.
    Loading,
    /// The run exists but has no operation records.
    NotStarted,
    Tracking(ProgressSnapshot),
}

/// Read-only state of a tracked run, republished after every poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub run_id: String,
    pub phase: ViewPhase,
    /// Inline error from the most recent poll; cleared by the next success.
    pub fetch_error: Option<ErrorPresentation>,
    /// Secondary status source, when enabled and reachable.
    pub summary: Option<ValidationRunSummary>,
    /// Number of polls applied so far (successful or not).
    pub polls: u64,
}

impl ProgressView {
    pub fn loading(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            phase: ViewPhase::Loading,
            fetch_error: None,
            summary: None,
            polls: 0,
        }
    }

    pub fn snapshot(&self) -> Option<&ProgressSnapshot> {
        match &self.phase {
            ViewPhase::Tracking(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    /// Resolves the display stage from the summary, falling back to `legacy`
    /// when the summary is absent or carries neither status.
    pub fn stage(&self, legacy: Stage) -> Stage {
        match &self.summary {
            Some(summary) => resolve_stage(
                summary.extract_status.as_deref(),
                summary.validation_status.as_deref(),
                legacy,
            ),
            None => legacy,
        }
    }

    /// Dialog model with the aggregate progress on the ring.
    pub fn dialog(&self, legacy: Stage) -> ProgressDialog {
        let progress = self
            .snapshot()
            .map(|s| u32::from(s.aggregate_progress))
            .unwrap_or(0);
        ProgressDialog::new(self.stage(legacy), progress)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Latches
// ─────────────────────────────────────────────────────────────────────────────

/// Terminal notification produced by a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Completed,
    Failed(String),
}

/// Result of feeding one fetch result into a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The session was closed; nothing changed.
    Discarded,
    /// The view was updated, possibly firing a notification.
    Applied(Option<Notification>),
}

/// At-most-once guards for the two terminal notifications of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Latches {
    completion_fired: bool,
    failure_fired: bool,
}

impl Latches {
    /// Decides which notification (if any) this poll fires.
    ///
    /// Completion is checked first; the failure condition excludes the
    /// all-complete case, so one poll never fires both.
    pub fn observe(
        &mut self,
        aggregate: &RunAggregate,
        records: &[OperationRecord],
    ) -> Option<Notification> {
        if aggregate.is_complete() {
            if !self.completion_fired {
                self.completion_fired = true;
                return Some(Notification::Completed);
            }
            return None;
        }

        if aggregate.has_failures() && !self.failure_fired {
            self.failure_fired = true;
            return Some(Notification::Failed(failure_message(records)));
        }

        None
    }

    pub fn completion_fired(&self) -> bool {
        self.completion_fired
    }

    pub fn failure_fired(&self) -> bool {
        self.failure_fired
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RunSession
// ─────────────────────────────────────────────────────────────────────────────

/// Tracking state of exactly one run.
///
/// Once closed, every apply call is a no-op: responses that land after
/// cancellation never touch the view or the latches.
#[derive(Debug)]
pub struct RunSession {
    run_id: String,
    latches: Latches,
    view: ProgressView,
    closed: bool,
}

impl RunSession {
    pub fn new(run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        Self {
            view: ProgressView::loading(run_id.clone()),
            run_id,
            latches: Latches::default(),
            closed: false,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn view(&self) -> &ProgressView {
        &self.view
    }

    pub fn latches(&self) -> Latches {
        self.latches
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stops accepting updates.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Applies a successful fetch.
    ///
    /// Records are re-sorted into creation order so selection never depends on
    /// response order.
    pub fn apply_records(
        &mut self,
        mut records: Vec<OperationRecord>,
        summary: Option<ValidationRunSummary>,
    ) -> PollOutcome {
        if self.closed {
            return PollOutcome::Discarded;
        }

        sort_by_creation(&mut records);

        self.view.polls += 1;
        self.view.fetch_error = None;
        self.view.summary = summary;

        let notification = match RunAggregate::compute(&records) {
            None => {
                self.view.phase = ViewPhase::NotStarted;
                None
            }
            Some(aggregate) => {
                self.view.phase = ProgressSnapshot::from_records(&records)
                    .map(ViewPhase::Tracking)
                    .unwrap_or(ViewPhase::NotStarted);
                self.latches.observe(&aggregate, &records)
            }
        };

        match &notification {
            Some(Notification::Completed) => {
                info!("[TRACKER] Run {} completed", redact_id(&self.run_id));
            }
            Some(Notification::Failed(_)) => {
                warn!(
                    "[TRACKER] Run {} has failed operations",
                    redact_id(&self.run_id)
                );
            }
            None => {}
        }

        PollOutcome::Applied(notification)
    }

    /// Records a transient fetch error. The last snapshot and the latches are
    /// kept.
    pub fn apply_fetch_error(&mut self, error: &AppError) -> PollOutcome {
        if self.closed {
            return PollOutcome::Discarded;
        }

        if error.is_transient() {
            warn!(
                "[TRACKER] Poll for run {} failed: {}",
                redact_id(&self.run_id),
                error
            );
        } else {
            error!(
                "[TRACKER] Poll for run {} failed: {}",
                redact_id(&self.run_id),
                error
            );
        }

        self.view.polls += 1;
        self.view.fetch_error = Some(error.to_presentation());
        PollOutcome::Applied(None)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::record::OperationStatus;
    use chrono::{TimeZone, Utc};

    fn record(id: &str, status: OperationStatus, created_secs: i64) -> OperationRecord {
        OperationRecord {
            id: id.to_string(),
            operation_name: format!("job {}", id),
            status,
            progress_percentage: None,
            elapsed_time_ms: None,
            max_wait_time_ms: None,
            error_message: None,
            created_at: Some(Utc.timestamp_opt(1_700_000_000 + created_secs, 0).unwrap()),
            started_at: None,
            updated_at: None,
        }
    }

    fn failing(id: &str, status: OperationStatus, created_secs: i64, msg: &str) -> OperationRecord {
        let mut r = record(id, status, created_secs);
        r.error_message = Some(msg.to_string());
        r
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Empty runs
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_empty_record_set_is_not_started_and_silent() {
        let mut session = RunSession::new("run-1");

        for _ in 0..5 {
            let outcome = session.apply_records(Vec::new(), None);
            assert_eq!(outcome, PollOutcome::Applied(None));
        }

        assert_eq!(session.view().phase, ViewPhase::NotStarted);
        assert!(session.view().snapshot().is_none());
        assert_eq!(session.latches(), Latches::default());
    }

    #[test]
    fn test_new_session_is_loading() {
        let session = RunSession::new("run-1");
        assert_eq!(session.view().phase, ViewPhase::Loading);
        assert_eq!(session.view().polls, 0);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Completion latch
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_completion_fires_once_across_many_polls() {
        let mut session = RunSession::new("run-1");

        let in_progress = vec![
            record("a", OperationStatus::Completed, 1),
            record("b", OperationStatus::Processing, 2),
        ];
        assert_eq!(session.apply_records(in_progress, None), PollOutcome::Applied(None));

        let done = vec![
            record("a", OperationStatus::Completed, 1),
            record("b", OperationStatus::Completed, 2),
        ];
        assert_eq!(
            session.apply_records(done.clone(), None),
            PollOutcome::Applied(Some(Notification::Completed))
        );

        for _ in 0..100 {
            assert_eq!(session.apply_records(done.clone(), None), PollOutcome::Applied(None));
        }

        assert!(session.latches().completion_fired());
        assert_eq!(session.view().snapshot().unwrap().aggregate_progress, 100);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Failure latch
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_failure_fires_once_with_earliest_failing_message() {
        let mut session = RunSession::new("run-1");

        let records = vec![
            record("a", OperationStatus::Completed, 1),
            failing("c", OperationStatus::Failed, 3, "later failure"),
            failing("b", OperationStatus::Timeout, 2, "embedding timed out"),
            record("d", OperationStatus::Processing, 4),
        ];

        assert_eq!(
            session.apply_records(records.clone(), None),
            PollOutcome::Applied(Some(Notification::Failed(
                "embedding timed out".to_string()
            )))
        );

        for _ in 0..10 {
            assert_eq!(session.apply_records(records.clone(), None), PollOutcome::Applied(None));
        }

        let failure = session.view().snapshot().unwrap().failure.clone().unwrap();
        assert_eq!(failure.failed_count, 2);
        assert_eq!(failure.first_message, "embedding timed out");
    }

    #[test]
    fn test_completion_after_failure_still_fires_completion() {
        let mut session = RunSession::new("run-1");

        // A failed job later retried by its producer into completed
        let failed = vec![
            failing("a", OperationStatus::Failed, 1, "transient"),
            record("b", OperationStatus::Processing, 2),
        ];
        assert!(matches!(
            session.apply_records(failed, None),
            PollOutcome::Applied(Some(Notification::Failed(_)))
        ));

        let done = vec![
            record("a", OperationStatus::Completed, 1),
            record("b", OperationStatus::Completed, 2),
        ];
        assert_eq!(
            session.apply_records(done, None),
            PollOutcome::Applied(Some(Notification::Completed))
        );
    }

    #[test]
    fn test_latches_order_complete_before_failure() {
        let mut latches = Latches::default();
        let records = vec![record("a", OperationStatus::Completed, 1)];
        let aggregate = RunAggregate::compute(&records).unwrap();

        assert_eq!(
            latches.observe(&aggregate, &records),
            Some(Notification::Completed)
        );
        assert!(!latches.failure_fired());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fetch errors
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_fetch_error_keeps_snapshot_and_latches() {
        let mut session = RunSession::new("run-1");
        let records = vec![
            record("a", OperationStatus::Completed, 1),
            record("b", OperationStatus::Processing, 2),
        ];
        session.apply_records(records.clone(), None);
        let before = session.view().snapshot().cloned();

        assert_eq!(
            session.apply_fetch_error(&AppError::ConnectionFailed("reset".into())),
            PollOutcome::Applied(None)
        );

        assert_eq!(session.view().snapshot().cloned(), before);
        assert!(session.view().fetch_error.is_some());
        assert_eq!(session.view().polls, 2);

        session.apply_records(records, None);
        assert!(session.view().fetch_error.is_none());
    }

    #[test]
    fn test_fetch_error_before_first_success_stays_loading() {
        let mut session = RunSession::new("run-1");
        session.apply_fetch_error(&AppError::StoreError("HTTP 500".into()));
        assert_eq!(session.view().phase, ViewPhase::Loading);
        assert!(session.view().fetch_error.is_some());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Closing
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_closed_session_discards_updates() {
        let mut session = RunSession::new("run-1");
        session.close();

        let done = vec![record("a", OperationStatus::Completed, 1)];
        assert_eq!(session.apply_records(done, None), PollOutcome::Discarded);
        assert_eq!(
            session.apply_fetch_error(&AppError::ConnectionFailed("late".into())),
            PollOutcome::Discarded
        );

        assert_eq!(session.view(), &ProgressView::loading("run-1"));
        assert_eq!(session.latches(), Latches::default());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stage resolution through the view
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_view_stage_uses_legacy_without_summary() {
        let view = ProgressView::loading("run-1");
        assert_eq!(view.stage(Stage::DocExtracted), Stage::DocExtracted);
    }

    #[test]
    fn test_view_stage_uses_summary_when_present() {
        let mut session = RunSession::new("run-1");
        let summary = ValidationRunSummary {
            extract_status: Some("Uploading".into()),
            validation_status: Some("Completed".into()),
            completed_count: 4,
            total_requirement_count: 4,
        };
        session.apply_records(vec![record("a", OperationStatus::Processing, 1)], Some(summary));

        assert_eq!(session.view().stage(Stage::Pending), Stage::Validated);

        let dialog = session.view().dialog(Stage::Pending);
        assert_eq!(dialog.stage, Stage::Validated);
        assert_eq!(dialog.progress, 0);
    }
}
