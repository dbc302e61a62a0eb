//! JSON-over-HTTP client with transient-error retries.

use reqwest::{header, Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::error::{ApiError, OvercloudError, Result};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default maximum number of retries for transient failures.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between retries in milliseconds.
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Result type for transport-level calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Retry policy for transient failures.
///
/// The delay grows linearly with the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    pub max_retries: u32,
    /// Base delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy.
    #[must_use]
    pub const fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Returns the delay before the given retry (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

/// HTTP client for one remote service.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// HTTP client.
    client: Client,
    /// Service name used in errors and logs.
    service: &'static str,
    /// Base URL without trailing slash.
    base_url: String,
    /// Optional bearer token.
    token: Option<String>,
    /// Retry policy for transient failures.
    retry: RetryPolicy,
}

impl ApiClient {
    /// Creates a client for `service` rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(service: &'static str, base_url: &str, token: Option<String>) -> Result<Self> {
        Self::with_timeout(
            service,
            base_url,
            token,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }

    /// Creates a client with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(
        service: &'static str,
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                OvercloudError::Api(ApiError::network(
                    service,
                    format!("Failed to create HTTP client: {e}"),
                ))
            })?;

        Ok(Self {
            client,
            service,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            retry: RetryPolicy::default(),
        })
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the service name.
    #[must_use]
    pub const fn service(&self) -> &'static str {
        self.service
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issues a GET request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be decoded.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let body = self.execute(Method::GET, path, None).await?;
        self.decode(&body)
    }

    /// Issues a GET request, mapping 404 to `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails for any other reason.
    pub async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> ApiResult<Option<T>> {
        match self.get(path).await {
            Ok(value) => Ok(Some(value)),
            Err(ApiError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Issues a POST request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be decoded.
    pub async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        let payload = self.encode(body)?;
        let body = self.execute(Method::POST, path, Some(&payload)).await?;
        self.decode(&body)
    }

    /// Issues a PUT request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be decoded.
    pub async fn put<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        let payload = self.encode(body)?;
        let body = self.execute(Method::PUT, path, Some(&payload)).await?;
        self.decode(&body)
    }

    /// Issues a DELETE request. Returns `false` if the resource was already gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails for any reason other than 404.
    pub async fn delete(&self, path: &str) -> ApiResult<bool> {
        match self.execute(Method::DELETE, path, None).await {
            Ok(_) => Ok(true),
            Err(ApiError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Executes a request, retrying transient failures.
    ///
    /// Requests that start remote work (POST, PUT) are only retried when the
    /// service refused them outright with 429; a timeout or 5xx may mean the
    /// work was accepted, so the error is surfaced and the caller re-reads
    /// the remote state instead.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ApiResult<String> {
        let mut attempt = 0;

        loop {
            match self.execute_once(method.clone(), path, body).await {
                Ok(response) => return Ok(response),
                Err(e) if may_retry(&method, &e) && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = match &e {
                        ApiError::RateLimited {
                            retry_after_secs, ..
                        } => Duration::from_secs(*retry_after_secs),
                        _ => self.retry.delay_for(attempt),
                    };
                    warn!(
                        "{} {method} {path} failed ({e}), retry {attempt} of {} in {}ms",
                        self.service,
                        self.retry.max_retries,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Executes a single request and maps the status code.
    async fn execute_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ApiResult<String> {
        let url = self.url(path);
        trace!("{} {method} {url}", self.service);

        let mut request = self
            .client
            .request(method, &url)
            .header(header::ACCEPT, "application/json");

        if let Some(token) = &self.token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::network(self.service, format!("Request failed: {e}")))?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            let retry_after = if retry_after == 0 { 60 } else { retry_after };

            return Err(ApiError::RateLimited {
                service: self.service,
                retry_after_secs: retry_after,
            });
        }

        let text = response.text().await.map_err(|e| {
            ApiError::network(self.service, format!("Failed to read response body: {e}"))
        })?;

        if status.is_success() {
            debug!("{} {url} -> {}", self.service, status.as_u16());
            return Ok(text);
        }

        Err(self.map_status(status, path, text))
    }

    /// Maps a non-success status onto the error taxonomy.
    fn map_status(&self, status: StatusCode, path: &str, body: String) -> ApiError {
        let service = self.service;
        match status.as_u16() {
            401 | 403 => ApiError::AuthenticationFailed {
                service,
                message: if body.is_empty() {
                    String::from("Invalid or expired token")
                } else {
                    body
                },
            },
            404 => ApiError::NotFound {
                service,
                resource: path.to_string(),
            },
            409 => ApiError::Conflict {
                service,
                message: body,
            },
            code @ 400..=499 => ApiError::Rejected {
                service,
                status: code,
                message: body,
            },
            code => ApiError::ServerError {
                service,
                status: code,
                message: body,
            },
        }
    }

    /// Joins the base URL and a path.
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Serializes a request body.
    fn encode<B: Serialize>(&self, body: &B) -> ApiResult<serde_json::Value> {
        serde_json::to_value(body).map_err(|e| {
            ApiError::invalid_response(self.service, format!("Failed to encode request: {e}"))
        })
    }

    /// Decodes a response body. Empty bodies decode as JSON `null`.
    fn decode<T: DeserializeOwned>(&self, body: &str) -> ApiResult<T> {
        let body = if body.trim().is_empty() { "null" } else { body };
        serde_json::from_str(body).map_err(|e| {
            ApiError::invalid_response(self.service, format!("Failed to parse response: {e}"))
        })
    }
}

fn may_retry(method: &Method, error: &ApiError) -> bool {
    match error {
        ApiError::RateLimited { .. } => true,
        e if e.is_transient() => {
            *method == Method::GET || *method == Method::HEAD || *method == Method::DELETE
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::new("orchestration", &server.uri(), Some(String::from("secret")))
            .expect("client")
            .with_retry(RetryPolicy::new(1, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_get_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stacks/overcloud"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let value: serde_json::Value = client(&server).get("/stacks/overcloud").await.expect("get");
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_not_found_maps_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let value: Option<serde_json::Value> = client(&server)
            .get_optional("/stacks/missing")
            .await
            .expect("get");
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_retried_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let result: ApiResult<serde_json::Value> = client(&server).get("/stacks").await;
        assert!(matches!(result, Err(ApiError::ServerError { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_post_server_error_is_sent_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/executions"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let result: ApiResult<serde_json::Value> = client(&server)
            .post("/executions", &serde_json::json!({"workflow_name": "upgrade"}))
            .await;
        assert!(matches!(result, Err(ApiError::ServerError { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(409).set_body_string("stack busy"))
            .expect(1)
            .mount(&server)
            .await;

        let result: ApiResult<serde_json::Value> = client(&server)
            .put("/stacks/overcloud", &serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(ApiError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let deleted = client(&server).delete("/stacks/gone").await.expect("delete");
        assert!(!deleted);
    }

    #[test]
    fn test_retry_delay_is_linear() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
        assert_eq!(RetryPolicy::none().max_retries, 0);
    }
}
