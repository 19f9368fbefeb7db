//! HTTP client for the remote status store.
//!
//! # Endpoints
//!
//! - `GET {base}/runs/{run_id}/operations?order=created_at.asc`
//! - `GET {base}/runs/{run_id}/summary`
//!
//! # Security
//!
//! - The bearer token is held in a `SecretString` and never logged
//! - Only HTTP method, sanitized path and status codes are logged
//! - Run ids are truncated in log lines

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::config::StoreConfig;
use crate::error::AppError;
use crate::store::{OperationSource, SourceFuture, ValidationRunSummary};
use crate::tracking::record::OperationRecord;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all store requests.
const CLIENT_USER_AGENT: &str = concat!("runwatch/", env!("CARGO_PKG_VERSION"));

/// Ordering requested from the store for operation listings.
const OPERATIONS_ORDER: &str = "created_at.asc";

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Error body returned by the store.
#[derive(Debug, Deserialize)]
struct WireStoreError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// StoreClient
// ─────────────────────────────────────────────────────────────────────────────

/// Read-only client for run status data.
#[derive(Clone)]
pub struct StoreClient {
    /// Shared HTTP client.
    http: Arc<Client>,
    /// Base URL, always ending in `/`.
    base_url: Url,
    /// Optional bearer token.
    api_token: Option<SecretString>,
    /// Whether the summary endpoint is queried at all.
    summary_enabled: bool,
}

impl StoreClient {
    /// Builds a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the HTTP client fails to initialize.
    pub fn new(config: &StoreConfig) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_http(Arc::new(http), config))
    }

    /// Builds a client around an existing HTTP client.
    pub fn with_http(http: Arc<Client>, config: &StoreConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.clone(),
            api_token: config.api_token.clone(),
            summary_enabled: config.summary_enabled,
        }
    }

    /// Fetches all operation records of a run, ordered by creation time.
    ///
    /// # Errors
    ///
    /// - `AppError::ConnectionFailed` - Network error
    /// - `AppError::RateLimited` - Store is throttling requests
    /// - `AppError::NotFound` - Unknown run
    /// - `AppError::StoreError` - Any other non-success status or bad body
    pub async fn list_operations(&self, run_id: &str) -> Result<Vec<OperationRecord>, AppError> {
        let mut url = self.build_run_url(run_id, "operations")?;
        url.query_pairs_mut().append_pair("order", OPERATIONS_ORDER);

        let records: Vec<OperationRecord> = self
            .get_json(url, self.log_path(run_id, "operations"))
            .await?;

        debug!(
            "[STORE] Run {} returned {} operation records",
            redact_id(run_id),
            records.len()
        );

        Ok(records)
    }

    /// Fetches the validation run summary.
    ///
    /// Returns `Ok(None)` without a request when the summary source is disabled.
    pub async fn get_run_summary(
        &self,
        run_id: &str,
    ) -> Result<Option<ValidationRunSummary>, AppError> {
        if !self.summary_enabled {
            return Ok(None);
        }

        let url = self.build_run_url(run_id, "summary")?;
        let summary: ValidationRunSummary = self
            .get_json(url, self.log_path(run_id, "summary"))
            .await?;
        Ok(Some(summary))
    }

    /// Executes an authenticated GET and decodes the JSON body.
    async fn get_json<T: DeserializeOwned>(&self, url: Url, log_path: String) -> Result<T, AppError> {
        info!("[STORE] GET {}", log_path);

        let mut request = self.http.get(url);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Store request failed: {}", e)))?;

        let status = response.status();
        info!("[STORE] GET {} -> {}", log_path, status.as_u16());

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::StoreError(format!("Failed to parse store response: {}", e)))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // URL Builders
    // ─────────────────────────────────────────────────────────────────────────

    /// Builds `{base}/runs/{run_id}/{resource}` with the run id percent-encoded.
    fn build_run_url(&self, run_id: &str, resource: &str) -> Result<Url, AppError> {
        if run_id.trim().is_empty() {
            return Err(AppError::InvalidConfig("run id must not be empty".to_string()));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::Internal("Store URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["runs", run_id, resource]);
        Ok(url)
    }

    /// Path used in log lines: no host, no query, run id redacted.
    fn log_path(&self, run_id: &str, resource: &str) -> String {
        format!(
            "{}runs/{}/{}",
            self.base_url.path(),
            redact_id(run_id),
            resource
        )
    }
}

impl OperationSource for StoreClient {
    fn list_operations<'a>(&'a self, run_id: &'a str) -> SourceFuture<'a, Vec<OperationRecord>> {
        Box::pin(StoreClient::list_operations(self, run_id))
    }

    fn run_summary<'a>(
        &'a self,
        run_id: &'a str,
    ) -> SourceFuture<'a, Option<ValidationRunSummary>> {
        Box::pin(StoreClient::get_run_summary(self, run_id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error Handling
// ─────────────────────────────────────────────────────────────────────────────

/// Parses an error response and maps it to the appropriate AppError.
async fn parse_error_response(response: reqwest::Response, status: reqwest::StatusCode) -> AppError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        return AppError::RateLimited {
            retry_after_secs: retry_after,
        };
    }

    if status == reqwest::StatusCode::NOT_FOUND {
        return AppError::NotFound("Run not found in status store".to_string());
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("Unable to read error body"));

    if let Ok(error) = serde_json::from_str::<WireStoreError>(&body) {
        return match error.code {
            Some(code) => AppError::StoreError(format!("[{}] {}", code, error.message)),
            None => AppError::StoreError(error.message),
        };
    }

    AppError::StoreError(format!(
        "HTTP {} - {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown error")
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Redacts a run id for logging (shows first 8 chars).
pub(crate) fn redact_id(id: &str) -> String {
    match id.char_indices().nth(8) {
        Some((idx, _)) => format!("{}...", &id[..idx]),
        None => id.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::record::OperationStatus;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RUN_ID: &str = "run-2024-0001-abcdef";

    /// Helper to create a test client pointing to the mock server.
    fn create_test_client(mock_url: &str, summary_enabled: bool) -> StoreClient {
        let config = StoreConfig::new(mock_url)
            .unwrap()
            .with_token("test_token")
            .with_summary(summary_enabled);
        StoreClient::new(&config).unwrap()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operation Listing Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_list_operations_success() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri(), false);

        let response_body = serde_json::json!([
            {
                "id": "op-1",
                "operationName": "Embed handbook.pdf",
                "status": "completed",
                "progressPercentage": 100,
                "createdAt": "2024-03-01T10:00:00Z"
            },
            {
                "id": "op-2",
                "operationName": "Generate questions",
                "status": "processing",
                "progressPercentage": 35,
                "elapsedTimeMs": 4000,
                "createdAt": "2024-03-01T10:00:05Z"
            }
        ]);

        Mock::given(method("GET"))
            .and(path(format!("/runs/{}/operations", RUN_ID)))
            .and(query_param("order", "created_at.asc"))
            .and(header("Authorization", "Bearer test_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&response_body))
            .expect(1)
            .mount(&mock_server)
            .await;

        let records = client.list_operations(RUN_ID).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, OperationStatus::Completed);
        assert_eq!(records[1].id, "op-2");
        assert_eq!(records[1].progress(), 35);
    }

    #[tokio::test]
    async fn test_list_operations_keeps_base_path_prefix() {
        let mock_server = MockServer::start().await;
        let config = StoreConfig::new(&format!("{}/api/v1", mock_server.uri())).unwrap();
        let client = StoreClient::new(&config).unwrap();

        Mock::given(method("GET"))
            .and(path(format!("/api/v1/runs/{}/operations", RUN_ID)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let records = client.list_operations(RUN_ID).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_empty_run_id_is_rejected() {
        let client = create_test_client("http://127.0.0.1:9", false);
        let result = client.list_operations("  ").await;
        assert!(matches!(result, Err(AppError::InvalidConfig(_))));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Summary Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_summary_disabled_makes_no_request() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri(), false);

        Mock::given(method("GET"))
            .and(path(format!("/runs/{}/summary", RUN_ID)))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let summary = client.get_run_summary(RUN_ID).await.unwrap();
        assert!(summary.is_none());
    }

    #[tokio::test]
    async fn test_summary_enabled_fetches_summary() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri(), true);

        Mock::given(method("GET"))
            .and(path(format!("/runs/{}/summary", RUN_ID)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "extractStatus": "Uploading",
                "validationStatus": null,
                "completedCount": 3,
                "totalRequirementCount": 12
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let summary = client.get_run_summary(RUN_ID).await.unwrap().unwrap();

        assert_eq!(summary.extract_status.as_deref(), Some("Uploading"));
        assert_eq!(summary.validation_status, None);
        assert_eq!(summary.requirement_progress(), 25);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Error Handling Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_rate_limited_error() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri(), false);

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "60"))
            .mount(&mock_server)
            .await;

        match client.list_operations(RUN_ID).await.unwrap_err() {
            AppError::RateLimited { retry_after_secs } => {
                assert_eq!(retry_after_secs, Some(60));
            }
            e => panic!("Expected RateLimited, got: {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_not_found_error() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri(), false);

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let result = client.list_operations(RUN_ID).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_store_error_parsing() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri(), false);

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": "PGRST100",
                "message": "failed to parse order"
            })))
            .mount(&mock_server)
            .await;

        match client.list_operations(RUN_ID).await.unwrap_err() {
            AppError::StoreError(msg) => {
                assert!(msg.contains("PGRST100"));
                assert!(msg.contains("failed to parse order"));
            }
            e => panic!("Expected StoreError, got: {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_store_error_without_json_body() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri(), false);

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&mock_server)
            .await;

        match client.list_operations(RUN_ID).await.unwrap_err() {
            AppError::StoreError(msg) => assert!(msg.contains("503")),
            e => panic!("Expected StoreError, got: {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_store_error() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri(), false);

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{ not json"))
            .mount(&mock_server)
            .await;

        let result = client.list_operations(RUN_ID).await;
        assert!(matches!(result, Err(AppError::StoreError(_))));
    }

    #[tokio::test]
    async fn test_connection_failure() {
        // Bind then release an ephemeral port so nothing is listening on it
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = create_test_client(&format!("http://127.0.0.1:{}", port), false);
        let result = client.list_operations(RUN_ID).await;
        assert!(matches!(result, Err(AppError::ConnectionFailed(_))));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helper Function Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_redact_id_long() {
        assert_eq!(redact_id("run-2024-0001-abcdef"), "run-2024...");
    }

    #[test]
    fn test_redact_id_short() {
        assert_eq!(redact_id("short"), "short");
    }

    #[test]
    fn test_log_path_hides_host_query_and_run_id() {
        let config = StoreConfig::new("https://store.example.com/api").unwrap();
        let client = StoreClient::new(&config).unwrap();

        assert_eq!(
            client.log_path(RUN_ID, "operations"),
            "/api/runs/run-2024.../operations"
        );
    }
}
