//! Timer-driven polling of a run's operation records.
//!
//! Each tracked run gets one spawned task holding a fixed-period
//! `tokio::time::interval`. Every tick spawns a fetch, so a slow store can
//! have several fetches in flight for the same run; results are applied in
//! arrival order with no sequencing guard, which is safe because the
//! aggregate is recomputed from scratch on every result.
//!
//! # Cancellation
//!
//! [`SessionHandle::cancel`] trips the session's `CancellationToken`, closes
//! the session, then waits for any delivery running on another thread. No
//! callback can run and no state can change once `cancel` returns, even for a
//! fetch that was already in flight.
//!
//! Listener callbacks run outside the session lock. The delivery lock is
//! reentrant, so a callback may cancel or drop the handle of its own run.

use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::TrackerOptions;
use crate::error::AppError;
use crate::store::client::redact_id;
use crate::store::{OperationSource, ValidationRunSummary};

use super::record::OperationRecord;
use super::session::{Notification, PollOutcome, ProgressView, RunListener, RunSession};

/// Result of one fetch: the records plus the optional summary.
type FetchResult = Result<(Vec<OperationRecord>, Option<ValidationRunSummary>), AppError>;

// ─────────────────────────────────────────────────────────────────────────────
// Shared session state
// ─────────────────────────────────────────────────────────────────────────────

struct Shared {
    session: Mutex<RunSession>,
    /// Held for the whole of one apply, callbacks included.
    delivery: ReentrantMutex<()>,
    listener: Arc<dyn RunListener>,
    view_tx: watch::Sender<ProgressView>,
}

impl Shared {
    /// Feeds one fetch result into the session and delivers what it produced.
    fn apply(&self, result: FetchResult) {
        let _delivery = self.delivery.lock();

        let (view, notification) = {
            let mut session = self.session.lock();

            let outcome = match result {
                Ok((records, summary)) => session.apply_records(records, summary),
                Err(e) => session.apply_fetch_error(&e),
            };

            let PollOutcome::Applied(notification) = outcome else {
                debug!(
                    "[TRACKER] Discarded late result for run {}",
                    redact_id(session.run_id())
                );
                return;
            };

            (session.view().clone(), notification)
        };

        // A callback may close the session; re-check before each delivery
        if self.is_closed() {
            return;
        }
        self.view_tx.send_replace(view.clone());
        self.listener.on_view(&view);

        let Some(notification) = notification else {
            return;
        };
        if self.is_closed() {
            return;
        }
        match notification {
            Notification::Completed => self.listener.on_complete(),
            Notification::Failed(message) => self.listener.on_error(&message),
        }
    }

    fn is_closed(&self) -> bool {
        self.session.lock().is_closed()
    }

    /// Closes the session and waits out a delivery in progress on another
    /// thread. On the delivering thread itself the reentrant lock is taken
    /// immediately.
    fn close(&self) {
        self.session.lock().close();
        drop(self.delivery.lock());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionHandle
// ─────────────────────────────────────────────────────────────────────────────

/// Owning handle of one run's tracking session.
///
/// Dropping the handle cancels the session.
pub struct SessionHandle {
    run_id: String,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Current view of the run.
    pub fn view(&self) -> ProgressView {
        self.shared.view_tx.borrow().clone()
    }

    /// Receiver that observes every published view.
    pub fn subscribe(&self) -> watch::Receiver<ProgressView> {
        self.shared.view_tx.subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops polling. No callback fires and the view does not change after
    /// this returns. Idempotent, and safe to call from a [`RunListener`]
    /// callback of the same run.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!("[TRACKER] Stopping run {}", redact_id(&self.run_id));
        }
        self.cancel.cancel();
        self.shared.close();
    }

    /// Waits for the poll task to finish. With auto refresh off this resolves
    /// after the single poll; otherwise only after cancellation.
    ///
    /// # Errors
    ///
    /// - `AppError::Cancelled` - the session was cancelled before the task ended
    /// - `AppError::Internal` - the poll task panicked
    pub async fn join(mut self) -> Result<(), AppError> {
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| AppError::Internal(format!("Poll task failed: {}", e)))?;
        }
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        Ok(())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// start
// ─────────────────────────────────────────────────────────────────────────────

/// Starts tracking `run_id` on the current tokio runtime.
///
/// # Errors
///
/// - `AppError::InvalidConfig` - empty run id or invalid options
pub fn start<S>(
    run_id: impl Into<String>,
    options: TrackerOptions,
    source: Arc<S>,
    listener: Arc<dyn RunListener>,
) -> Result<SessionHandle, AppError>
where
    S: OperationSource + 'static,
{
    let run_id = run_id.into();
    if run_id.trim().is_empty() {
        return Err(AppError::InvalidConfig("run id must not be empty".to_string()));
    }
    options.validate()?;

    let (view_tx, _) = watch::channel(ProgressView::loading(run_id.clone()));
    let shared = Arc::new(Shared {
        session: Mutex::new(RunSession::new(run_id.clone())),
        delivery: ReentrantMutex::new(()),
        listener,
        view_tx,
    });
    let cancel = CancellationToken::new();

    info!(
        "[TRACKER] Tracking run {} (auto_refresh={}, interval={}ms)",
        redact_id(&run_id),
        options.auto_refresh,
        options.refresh_interval.as_millis()
    );

    let task = tokio::spawn(poll_loop(
        shared.clone(),
        source,
        run_id.clone(),
        options,
        cancel.clone(),
    ));

    Ok(SessionHandle {
        run_id,
        shared,
        cancel,
        task: Some(task),
    })
}

async fn fetch<S: OperationSource + ?Sized>(source: &S, run_id: &str) -> FetchResult {
    let records = source.list_operations(run_id).await?;

    // The summary is optional; its failures never fail the poll
    let summary = match source.run_summary(run_id).await {
        Ok(summary) => summary,
        Err(e) => {
            debug!(
                "[TRACKER] Summary unavailable for run {}: {}",
                redact_id(run_id),
                e
            );
            None
        }
    };

    Ok((records, summary))
}

async fn poll_loop<S>(
    shared: Arc<Shared>,
    source: Arc<S>,
    run_id: String,
    options: TrackerOptions,
    cancel: CancellationToken,
) where
    S: OperationSource + 'static,
{
    if !options.auto_refresh {
        tokio::select! {
            _ = cancel.cancelled() => {}
            result = fetch(source.as_ref(), &run_id) => shared.apply(result),
        }
        return;
    }

    let mut ticker = tokio::time::interval(options.refresh_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight: JoinSet<FetchResult> = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            Some(joined) = in_flight.join_next() => match joined {
                Ok(result) => shared.apply(result),
                Err(e) if e.is_cancelled() => {}
                Err(e) => shared.apply(Err(AppError::Internal(format!("Poll task failed: {}", e)))),
            },

            _ = ticker.tick() => {
                let source = source.clone();
                let run_id = run_id.clone();
                in_flight.spawn(async move { fetch(source.as_ref(), &run_id).await });
            }
        }
    }

    in_flight.abort_all();
    debug!("[TRACKER] Poll loop for run {} exited", redact_id(&run_id));
}

// ─────────────────────────────────────────────────────────────────────────────
// ProgressTracker
// ─────────────────────────────────────────────────────────────────────────────

/// Tracks at most one run at a time, restarting from scratch whenever the run
/// identifier changes.
pub struct ProgressTracker<S: OperationSource + 'static> {
    source: Arc<S>,
    listener: Arc<dyn RunListener>,
    options: TrackerOptions,
    current: Option<SessionHandle>,
}

impl<S: OperationSource + 'static> ProgressTracker<S> {
    pub fn new(source: Arc<S>, listener: Arc<dyn RunListener>) -> Self {
        Self {
            source,
            listener,
            options: TrackerOptions::default(),
            current: None,
        }
    }

    pub fn with_options(mut self, options: TrackerOptions) -> Self {
        self.options = options;
        self
    }

    /// Tracks `run_id`. Same run as the active session: no-op. Different run:
    /// the old session is cancelled and a new one starts with fresh latches.
    pub fn track(&mut self, run_id: &str) -> Result<&SessionHandle, AppError> {
        let reuse = self
            .current
            .as_ref()
            .is_some_and(|h| h.run_id() == run_id && !h.is_cancelled());

        if !reuse {
            self.stop();
            let handle = start(
                run_id,
                self.options,
                self.source.clone(),
                self.listener.clone(),
            )?;
            self.current = Some(handle);
        }

        self.current
            .as_ref()
            .ok_or_else(|| AppError::Internal("tracking session missing".to_string()))
    }

    /// Cancels the active session, if any.
    pub fn stop(&mut self) {
        if let Some(handle) = self.current.take() {
            handle.cancel();
        }
    }

    pub fn current(&self) -> Option<&SessionHandle> {
        self.current.as_ref()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
