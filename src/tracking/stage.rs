//! Stage inference for the validation workflow.
//!
//! Two upstream status strings (extraction and validation) evolve
//! independently. [`resolve_stage`] collapses them into one of four ordered
//! stages with a fixed precedence table, so a caller feeding inconsistent data
//! still gets a single deterministic answer. When neither string is supplied
//! the caller's explicit legacy stage is used verbatim.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Stage
// ─────────────────────────────────────────────────────────────────────────────

/// The four ordered phases of a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Pending,
    ReqExtracted,
    DocExtracted,
    Validated,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Pending,
        Stage::ReqExtracted,
        Stage::DocExtracted,
        Stage::Validated,
    ];

    /// Zero-based position in the workflow.
    pub fn index(&self) -> usize {
        match self {
            Stage::Pending => 0,
            Stage::ReqExtracted => 1,
            Stage::DocExtracted => 2,
            Stage::Validated => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::ReqExtracted => "reqExtracted",
            Stage::DocExtracted => "docExtracted",
            Stage::Validated => "validated",
        }
    }

    pub fn appearance(&self) -> StageAppearance {
        match self {
            Stage::Pending => StageAppearance {
                label: "Pending",
                color: "#9ca3af",
                icon: "clock",
            },
            Stage::ReqExtracted => StageAppearance {
                label: "Requirements Extracted",
                color: "#3b82f6",
                icon: "file-search",
            },
            Stage::DocExtracted => StageAppearance {
                label: "Documents Extracted",
                color: "#f59e0b",
                icon: "file-check",
            },
            Stage::Validated => StageAppearance {
                label: "Validated",
                color: "#10b981",
                icon: "shield-check",
            },
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| AppError::InvalidConfig(format!("Unknown stage: {}", s)))
    }
}

/// Display attributes of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageAppearance {
    pub label: &'static str,
    pub color: &'static str,
    pub icon: &'static str,
}

// ─────────────────────────────────────────────────────────────────────────────
// Precedence table
// ─────────────────────────────────────────────────────────────────────────────

/// Raw upstream signals, normalised so blank strings count as absent.
#[derive(Debug, Clone, Copy)]
struct Signals<'a> {
    extract: Option<&'a str>,
    validation: Option<&'a str>,
}

type Rule = (fn(&Signals<'_>) -> bool, Stage);

const VALIDATION_DONE: &[&str] = &["Completed", "Finalised"];
const VALIDATION_RUNNING: &str = "In Progress";
const EXTRACTION_RUNNING: &[&str] = &[
    "In Progress",
    "ProcessingInBackground",
    "DocumentProcessing",
    "Uploading",
];

fn validation_done(s: &Signals<'_>) -> bool {
    s.validation.is_some_and(|v| VALIDATION_DONE.contains(&v))
}

fn validation_running(s: &Signals<'_>) -> bool {
    s.validation == Some(VALIDATION_RUNNING)
}

fn extraction_running(s: &Signals<'_>) -> bool {
    s.extract.is_some_and(|e| EXTRACTION_RUNNING.contains(&e))
}

/// Evaluated top-down; first match wins, no match means `Pending`.
const RULES: &[Rule] = &[
    (validation_done, Stage::Validated),
    (validation_running, Stage::DocExtracted),
    (extraction_running, Stage::ReqExtracted),
];

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|v| !v.trim().is_empty())
}

/// Resolves the display stage from the two upstream statuses.
///
/// Pure: identical inputs always give the identical stage. Validation-derived
/// rules outrank extraction, so a completed validation wins even while
/// extraction still reports `Uploading`.
pub fn resolve_stage(
    extract_status: Option<&str>,
    validation_status: Option<&str>,
    legacy: Stage,
) -> Stage {
    let signals = Signals {
        extract: non_blank(extract_status),
        validation: non_blank(validation_status),
    };

    if signals.extract.is_none() && signals.validation.is_none() {
        return legacy;
    }

    RULES
        .iter()
        .find(|(matches, _)| matches(&signals))
        .map(|(_, stage)| *stage)
        .unwrap_or(Stage::Pending)
}

// ─────────────────────────────────────────────────────────────────────────────
// Step flags
// ─────────────────────────────────────────────────────────────────────────────

/// Glyph state for one entry of the stage checklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StepMark {
    Completed,
    Active,
    Pending,
}

/// Checklist marks for all four stages given the resolved current stage.
///
/// Stage k is completed when the current stage is past it, or when the run is
/// `Validated` (which completes every stage including itself).
pub fn step_marks(current: Stage) -> [StepMark; 4] {
    Stage::ALL.map(|stage| {
        if current.index() > stage.index() || current == Stage::Validated {
            StepMark::Completed
        } else if current == stage {
            StepMark::Active
        } else {
            StepMark::Pending
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Progress dialog model
// ─────────────────────────────────────────────────────────────────────────────

/// One glyph in the secondary stage row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepView {
    pub stage: Stage,
    pub label: &'static str,
    pub mark: StepMark,
}

/// Render model for the circular progress dialog.
///
/// The ring shows caller-supplied progress; it is never derived from the stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressDialog {
    pub progress: u8,
    pub stage: Stage,
    pub appearance: StageAppearance,
    pub steps: [StepView; 4],
}

impl ProgressDialog {
    pub fn new(stage: Stage, progress: u32) -> Self {
        let marks = step_marks(stage);
        let steps = Stage::ALL.map(|s| StepView {
            stage: s,
            label: s.appearance().label,
            mark: marks[s.index()],
        });

        Self {
            progress: progress.min(100) as u8,
            stage,
            appearance: stage.appearance(),
            steps,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
