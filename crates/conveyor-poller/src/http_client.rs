//! Shared HTTP client for HTTP-backed task providers
//!
//! One `reqwest::Client` per provider instance, with connection reuse, a
//! per-request timeout and a small retry budget for connection failures.

use conveyor_utils::error::ProviderError;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Default connect timeout (30 seconds)
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of retry attempts after a failed connect
const MAX_RETRIES: u32 = 2;

/// Initial backoff duration for retries (1 second)
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub(crate) struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns `ProviderError::Misconfiguration` if the client cannot be constructed
    pub fn new() -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| {
                ProviderError::Misconfiguration(format!("Failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client })
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Send `request` once, mapping failures without retrying.
    pub async fn execute_once(
        &self,
        request: RequestBuilder,
        timeout: Duration,
        provider_name: &str,
    ) -> Result<Response, ProviderError> {
        self.send(request, timeout, provider_name)
            .await
            .map_err(|failure| failure.error)
    }

    /// Send `request`, resending it only when no connection could be made.
    ///
    /// Once a connection is established the provider may have acted on the
    /// request, so 5xx responses, resets and timeouts are returned as-is.
    ///
    /// - Per-request timeout: `timeout`
    /// - Up to 2 retries with linear backoff (1s, 2s)
    pub async fn execute_with_retry(
        &self,
        request_builder: RequestBuilder,
        timeout: Duration,
        provider_name: &str,
    ) -> Result<Response, ProviderError> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let request = request_builder.try_clone().ok_or_else(|| {
                ProviderError::Transport("Failed to clone request for retry".to_string())
            })?;

            debug!(
                provider = provider_name,
                attempt,
                timeout_secs = timeout.as_secs(),
                "Executing HTTP request"
            );

            match self.send(request, timeout, provider_name).await {
                Ok(response) => return Ok(response),
                Err(failure) if failure.may_retry() && attempt <= MAX_RETRIES => {
                    warn!(
                        provider = provider_name,
                        attempt,
                        error = %failure.error,
                        "Could not connect, will retry"
                    );
                    tokio::time::sleep(INITIAL_BACKOFF * attempt).await;
                }
                Err(failure) => return Err(failure.error),
            }
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        timeout: Duration,
        provider_name: &str,
    ) -> Result<Response, SendFailure> {
        let request = request.timeout(timeout).build().map_err(|e| SendFailure {
            error: ProviderError::Transport(format!("Failed to build request: {e}")),
            connect_failed: false,
        })?;

        match self.client.execute(request).await {
            Ok(response) => check_status(response, provider_name).map_err(|error| SendFailure {
                error,
                connect_failed: false,
            }),
            Err(e) => {
                let error = if e.is_timeout() {
                    ProviderError::Timeout { duration: timeout }
                } else {
                    ProviderError::Transport(format!(
                        "{provider_name} request failed: {}",
                        redact_error_message(&e.to_string())
                    ))
                };
                Err(SendFailure {
                    error,
                    connect_failed: e.is_connect(),
                })
            }
        }
    }
}

/// A failed send, and whether it failed before reaching the provider.
#[derive(Debug)]
struct SendFailure {
    error: ProviderError,
    connect_failed: bool,
}

impl SendFailure {
    fn may_retry(&self) -> bool {
        self.connect_failed
    }
}

fn check_status(response: Response, provider_name: &str) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_client_error() {
        return Err(map_client_error(status, provider_name));
    }
    if status.is_server_error() {
        return Err(ProviderError::Outage(format!(
            "{provider_name} returned server error: {status}"
        )));
    }
    Ok(response)
}

/// Map HTTP client error status codes to ProviderError variants
///
/// - 401/403 → `ProviderError::Auth`
/// - 429 → `ProviderError::Quota`
/// - Other 4xx → `ProviderError::Rejected`
pub(crate) fn map_client_error(status: StatusCode, provider_name: &str) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Auth(format!("{provider_name} authentication failed: {status}"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            ProviderError::Quota(format!("{provider_name} rate limit exceeded: {status}"))
        }
        _ => ProviderError::Rejected(format!("{provider_name} returned client error: {status}")),
    }
}

/// Pattern to match URLs with embedded credentials
static URL_WITH_CREDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(https?://)[^:@\s]+:[^@\s]+@").expect("valid credential regex"));

/// Pattern to match potential API keys (long alphanumeric strings)
static POTENTIAL_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^A-Za-z0-9_-])[A-Za-z0-9_-]{32,}(?:[^A-Za-z0-9_-]|$)")
        .expect("valid key regex")
});

/// Pattern to match bearer tokens
static BEARER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)bearer\s+\S+").expect("valid bearer regex"));

/// Remove credentials from an error message before it is logged or stored.
///
/// Job error details are visible to anyone polling status, so provider
/// failures pass through here first.
pub fn redact_error_message(message: &str) -> String {
    let redacted = URL_WITH_CREDS.replace_all(message, "$1[REDACTED]@");
    let redacted = BEARER.replace_all(&redacted, "Bearer [REDACTED]");
    let redacted = POTENTIAL_KEY.replace_all(&redacted, "[REDACTED_KEY]");
    redacted.to_string()
}
