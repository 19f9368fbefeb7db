//! Tracker and store configuration.

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Default poll interval in milliseconds.
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 5_000;

/// Default per-request timeout for store reads in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// ─────────────────────────────────────────────────────────────────────────────
// TrackerOptions
// ─────────────────────────────────────────────────────────────────────────────

/// Options recognised when tracking starts.
///
/// Deserializes from `{ "autoRefresh": bool, "refreshIntervalMs": int }`;
/// both keys are optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerOptions {
    /// Keep polling on a timer. When false exactly one poll is made.
    pub auto_refresh: bool,
    /// Fixed delay between polls. No backoff is applied.
    #[serde(rename = "refreshIntervalMs", deserialize_with = "duration_from_millis")]
    pub refresh_interval: Duration,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            auto_refresh: true,
            refresh_interval: Duration::from_millis(DEFAULT_REFRESH_INTERVAL_MS),
        }
    }
}

impl TrackerOptions {
    /// Single poll, no timer.
    pub fn once() -> Self {
        Self {
            auto_refresh: false,
            ..Self::default()
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Rejects a zero interval when auto refresh is on.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.auto_refresh && self.refresh_interval.is_zero() {
            return Err(AppError::InvalidConfig(
                "refresh interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn duration_from_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

// ─────────────────────────────────────────────────────────────────────────────
// StoreConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Connection settings for the remote status store.
#[derive(Clone)]
pub struct StoreConfig {
    /// Base URL; run paths are joined onto it.
    pub base_url: Url,
    /// Bearer token sent with every read, if any.
    pub api_token: Option<SecretString>,
    pub request_timeout: Duration,
    /// Fetch the run summary alongside operation records. Off by default
    /// because the summary endpoint is not generally available yet.
    pub summary_enabled: bool,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("base_url", &self.base_url.as_str())
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout", &self.request_timeout)
            .field("summary_enabled", &self.summary_enabled)
            .finish()
    }
}

impl StoreConfig {
    /// Parses the base URL. A trailing slash is added so relative joins keep
    /// any path prefix.
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };

        let base_url = Url::parse(&normalized)
            .map_err(|e| AppError::InvalidConfig(format!("Invalid store URL: {}", e)))?;

        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(AppError::InvalidConfig(format!(
                "Unsupported store URL scheme: {}",
                base_url.scheme()
            )));
        }

        Ok(Self {
            base_url,
            api_token: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            summary_enabled: false,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(SecretString::from(token.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_summary(mut self, enabled: bool) -> Self {
        self.summary_enabled = enabled;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = TrackerOptions::default();
        assert!(options.auto_refresh);
        assert_eq!(options.refresh_interval, Duration::from_millis(5_000));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_deserialize_partial() {
        let options: TrackerOptions = serde_json::from_str(r#"{ "refreshIntervalMs": 250 }"#).unwrap();
        assert!(options.auto_refresh);
        assert_eq!(options.refresh_interval, Duration::from_millis(250));

        let options: TrackerOptions = serde_json::from_str(r#"{ "autoRefresh": false }"#).unwrap();
        assert!(!options.auto_refresh);
        assert_eq!(options.refresh_interval, Duration::from_millis(5_000));
    }

    #[test]
    fn test_zero_interval_rejected_only_with_auto_refresh() {
        let options = TrackerOptions::default().with_interval(Duration::ZERO);
        assert!(matches!(options.validate(), Err(AppError::InvalidConfig(_))));

        let options = TrackerOptions::once().with_interval(Duration::ZERO);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_store_config_normalizes_trailing_slash() {
        let config = StoreConfig::new("https://store.example.com/api/v1").unwrap();
        assert_eq!(config.base_url.as_str(), "https://store.example.com/api/v1/");
        assert!(!config.summary_enabled);
    }

    #[test]
    fn test_store_config_rejects_bad_urls() {
        assert!(matches!(
            StoreConfig::new("not a url"),
            Err(AppError::InvalidConfig(_))
        ));
        assert!(matches!(
            StoreConfig::new("ftp://store.example.com"),
            Err(AppError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = StoreConfig::new("https://store.example.com")
            .unwrap()
            .with_token("super-secret");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
