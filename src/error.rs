use serde::Serialize;
use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for UI display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "apikey",
    "api_key",
    "access_token",
    "authorization:",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for UI display.
/// If sensitive content is detected, returns the fallback instead.
pub(crate) fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// User-friendly error presentation for inline display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Remote store ──────────────────────────────────────────────────────────
    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Not found: {0}")]
    NotFound(String),

    // ── Network ───────────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // ── Tracking ──────────────────────────────────────────────────────────────
    #[error("Tracking cancelled")]
    Cancelled,

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns true for errors that the next scheduled poll may recover from.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::StoreError(_)
                | AppError::RateLimited { .. }
                | AppError::NotFound(_)
                | AppError::ConnectionFailed(_)
        )
    }

    /// Converts the error into a presentation suitable for an inline message.
    /// Never leaks tokens or credentials.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Configuration ─────────────────────────────────────────────────
            AppError::InvalidConfig(msg) => ErrorPresentation {
                title: "Invalid Settings".into(),
                message: sanitize_message(msg, "The tracker settings are invalid."),
                action: Some("Fix the settings and start again".into()),
            },

            // ── Remote store ──────────────────────────────────────────────────
            AppError::StoreError(msg) => ErrorPresentation {
                title: "Status Unavailable".into(),
                message: sanitize_message(msg, "The status store returned an error."),
                action: None,
            },

            AppError::RateLimited { retry_after_secs } => {
                let wait_msg = match retry_after_secs {
                    Some(secs) => format!("Retrying in about {} seconds.", secs),
                    None => "Retrying shortly.".into(),
                };
                ErrorPresentation {
                    title: "Too Many Requests".into(),
                    message: format!("The status store is limiting requests. {}", wait_msg),
                    action: None,
                }
            }

            AppError::NotFound(_) => ErrorPresentation {
                title: "Run Not Found".into(),
                message: "No status is available for this run yet.".into(),
                action: None,
            },

            // ── Network ───────────────────────────────────────────────────────
            AppError::ConnectionFailed(_) => ErrorPresentation {
                title: "Connection Lost".into(),
                message: "Could not reach the status store. Progress will refresh automatically."
                    .into(),
                action: Some("Check network connection".into()),
            },

            // ── Tracking ──────────────────────────────────────────────────────
            AppError::Cancelled => ErrorPresentation {
                title: "Stopped".into(),
                message: "Progress tracking was stopped.".into(),
                action: None,
            },

            // ── Generic ───────────────────────────────────────────────────────
            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong while tracking progress.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}

// Allow AppError to be handed to a UI layer as-is
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_presentation().serialize(serializer)
    }
}
