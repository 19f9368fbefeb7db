//! runwatch - follow a processing run from the command line.
//!
//! Polls the status store for one run and prints a progress line whenever the
//! view changes. Exits 0 when every job completed, 1 when a job failed, 2 on
//! configuration errors and 130 when interrupted.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

use runwatch::config::{DEFAULT_REFRESH_INTERVAL_MS, DEFAULT_REQUEST_TIMEOUT_SECS};
use runwatch::logging::init_logging;
use runwatch::tracking::{self, ProgressTracker};
use runwatch::{
    AppError, ProgressView, RunListener, Stage, StoreClient, StoreConfig, TrackerOptions,
    ViewPhase,
};

const EXIT_FAILED: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "runwatch", version)]
#[command(about = "Watch the progress of a processing run", long_about = None)]
struct Args {
    /// Identifier of the run to track
    run_id: String,

    /// Base URL of the status store
    #[arg(long, env = "RUNWATCH_STORE_URL")]
    store_url: String,

    /// Bearer token for the status store
    #[arg(long, env = "RUNWATCH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Delay between polls in milliseconds
    #[arg(long, default_value_t = DEFAULT_REFRESH_INTERVAL_MS)]
    interval_ms: u64,

    /// Poll once, print the result and exit
    #[arg(long)]
    once: bool,

    /// Also read the run summary for stage display
    #[arg(long)]
    summary: bool,

    /// Stage shown when the run summary carries no status
    #[arg(long, default_value = "pending")]
    legacy_stage: Stage,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Listener
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum RunEvent {
    View(ProgressView),
    Complete,
    Failed(String),
}

/// Forwards tracker callbacks to the main task.
struct ChannelListener {
    tx: mpsc::UnboundedSender<RunEvent>,
}

impl RunListener for ChannelListener {
    fn on_complete(&self) {
        let _ = self.tx.send(RunEvent::Complete);
    }

    fn on_error(&self, message: &str) {
        let _ = self.tx.send(RunEvent::Failed(message.to_string()));
    }

    fn on_view(&self, view: &ProgressView) {
        let _ = self.tx.send(RunEvent::View(view.clone()));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

/// Renders one progress line for `view`.
fn render_line(view: &ProgressView, legacy: Stage) -> String {
    let stage = view.stage(legacy).appearance().label;

    let body = match &view.phase {
        ViewPhase::Loading => "loading".to_string(),
        ViewPhase::NotStarted => "not started".to_string(),
        ViewPhase::Tracking(snapshot) => {
            let mut line = format!(
                "{}% ({}/{} done, {} processing, {} failed)",
                snapshot.aggregate_progress,
                snapshot.completed_count,
                snapshot.total_count,
                snapshot.processing_count,
                snapshot.failed_count
            );
            if let Some(current) = &snapshot.current_operation {
                line.push_str(&format!(
                    " | {} {}%, ~{}s left",
                    current.name,
                    current.progress,
                    current.remaining_ms / 1000
                ));
            }
            line
        }
    };

    match &view.fetch_error {
        Some(err) => format!("[{}] {} (refresh failed: {})", stage, body, err.message),
        None => format!("[{}] {}", stage, body),
    }
}

/// Prints a view line unless it repeats the previous one.
struct Printer {
    legacy: Stage,
    last_line: Option<String>,
}

impl Printer {
    fn print(&mut self, view: &ProgressView) {
        let line = render_line(view, self.legacy);
        if self.last_line.as_deref() != Some(line.as_str()) {
            println!("{}", line);
            self.last_line = Some(line);
        }
    }

    /// Handles one event; returns the exit code once the run is settled.
    fn handle(&mut self, event: RunEvent) -> Option<u8> {
        match event {
            RunEvent::View(view) => {
                self.print(&view);
                None
            }
            RunEvent::Complete => {
                println!("Run complete");
                Some(0)
            }
            RunEvent::Failed(message) => {
                println!("Run failed: {}", message);
                Some(EXIT_FAILED)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match run(args).await {
        Ok(code) => code,
        Err(AppError::Cancelled) => ExitCode::from(EXIT_INTERRUPTED),
        Err(e) => {
            error!("{}", e);
            let presentation = e.to_presentation();
            eprintln!("{}: {}", presentation.title, presentation.message);
            if let Some(action) = presentation.action {
                eprintln!("{}", action);
            }
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

async fn run(args: Args) -> Result<ExitCode, AppError> {
    let mut config = StoreConfig::new(&args.store_url)?
        .with_timeout(Duration::from_secs(args.timeout_secs))
        .with_summary(args.summary);
    if let Some(token) = args.token {
        config = config.with_token(token);
    }

    let client = Arc::new(StoreClient::new(&config)?);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = Arc::new(ChannelListener { tx });
    let mut printer = Printer {
        legacy: args.legacy_stage,
        last_line: None,
    };

    if args.once {
        let handle = tracking::start(args.run_id, TrackerOptions::once(), client, listener)?;
        handle.join().await?;

        let mut code = 0;
        while let Ok(event) = rx.try_recv() {
            if let Some(settled) = printer.handle(event) {
                code = settled;
            }
        }
        return Ok(ExitCode::from(code));
    }

    let options =
        TrackerOptions::default().with_interval(Duration::from_millis(args.interval_ms));
    let mut tracker = ProgressTracker::new(client, listener).with_options(options);
    tracker.track(&args.run_id)?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let code = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, stopping");
                break EXIT_INTERRUPTED;
            }
            event = rx.recv() => match event {
                Some(event) => {
                    if let Some(code) = printer.handle(event) {
                        break code;
                    }
                }
                None => break 0,
            },
        }
    };

    tracker.stop();
    Ok(ExitCode::from(code))
}
