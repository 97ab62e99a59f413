//! HTTP retry helpers for transient errors.
//!
//! Every dataset request goes through [`send_json`] instead of calling
//! `reqwest::RequestBuilder::send()` directly, so each request gets
//! exponential backoff on transient failures (timeouts, connection
//! resets, server errors, rate limiting).
//!
//! # Usage
//!
//! ```ignore
//! use crate::retry::{self, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! let rows: Vec<RawRecord> =
//!     retry::send_json(&policy, || client.get(&url).query(&params)).await?;
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;

use crate::FetchError;

/// Maximum length of the response body kept in error messages.
const BODY_PREVIEW_LEN: usize = 500;

/// Upper bound on the backoff exponent so the doubling cannot overflow.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Longest server-requested wait honoured before a retry.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

/// How many times to attempt a request and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Wait before the first retry. Doubled for every retry after that.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Computed exponential backoff before retry number `retry` (1-based):
    /// `initial`, `2 × initial`, `4 × initial`, ...
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.initial_backoff.saturating_mul(1u32 << shift)
    }

    /// Wait before retry number `retry`. A server-supplied `Retry-After`
    /// wins over the computed backoff, capped at [`MAX_RETRY_AFTER`].
    #[must_use]
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(wait) if wait > MAX_RETRY_AFTER => {
                log::warn!(
                    "  Retry-After of {}s capped to {}s",
                    wait.as_secs(),
                    MAX_RETRY_AFTER.as_secs()
                );
                MAX_RETRY_AFTER
            }
            Some(wait) => wait,
            None => self.backoff(retry),
        }
    }
}

/// Why a single attempt failed, and whether trying again could help.
struct AttemptFailure {
    error: FetchError,
    retryable: bool,
    retry_after: Option<Duration>,
}

impl AttemptFailure {
    const fn permanent(error: FetchError) -> Self {
        Self {
            error,
            retryable: false,
            retry_after: None,
        }
    }

    const fn transient(error: FetchError, retry_after: Option<Duration>) -> Self {
        Self {
            error,
            retryable: true,
            retry_after,
        }
    }
}

/// Sends an HTTP request and parses the response body as JSON into `T`.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`] (builders are consumed by `.send()`).
///
/// # Retry behaviour
///
/// Retries HTTP 429, HTTP 5xx, network-level errors, and bodies that
/// fail to read or decode (truncated responses). Any other non-2xx
/// status fails immediately with the status and body. Each retry waits
/// [`RetryPolicy::delay_for`]; every retry is logged with its attempt
/// number and wait.
///
/// # Errors
///
/// Returns [`FetchError`] for a non-retryable status, or
/// [`FetchError::Exhausted`] wrapping the last observed error once
/// `max_attempts` attempts have failed.
#[allow(clippy::future_not_send)]
pub async fn send_json<T, F>(policy: &RetryPolicy, build_request: F) -> Result<T, FetchError>
where
    T: DeserializeOwned,
    F: Fn() -> reqwest::RequestBuilder,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let failure = match attempt_once(&build_request).await {
            Ok(value) => return Ok(value),
            Err(failure) => failure,
        };

        if !failure.retryable {
            return Err(failure.error);
        }

        if attempt >= max_attempts {
            log::error!(
                "  giving up after {attempt} attempt(s): {}",
                failure.error
            );
            return Err(FetchError::Exhausted {
                attempts: attempt,
                last: Box::new(failure.error),
            });
        }

        let delay = policy.delay_for(attempt, failure.retry_after);
        log::warn!(
            "  attempt {attempt}/{max_attempts} failed ({}), retrying in {delay:?}{}",
            failure.error,
            if failure.retry_after.is_some() {
                " (Retry-After)"
            } else {
                ""
            },
        );
        tokio::time::sleep(delay).await;
    }
}

/// Performs one request and classifies any failure.
#[allow(clippy::future_not_send)]
async fn attempt_once<T, F>(build_request: &F) -> Result<T, AttemptFailure>
where
    T: DeserializeOwned,
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = build_request().send().await.map_err(|e| {
        if is_transient(&e) {
            AttemptFailure::transient(FetchError::Http(e), None)
        } else {
            AttemptFailure::permanent(FetchError::Http(e))
        }
    })?;

    let status = response.status();
    let url = response.url().to_string();

    // 429 Too Many Requests and 5xx — retry, honouring Retry-After
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        let retry_after = parse_retry_after(response.headers(), Utc::now());
        let body = preview(&response.text().await.unwrap_or_default());
        return Err(AttemptFailure::transient(
            FetchError::Status {
                status: status.as_u16(),
                url,
                body,
            },
            retry_after,
        ));
    }

    // Anything else that isn't 2xx is permanent
    if !status.is_success() {
        let body = preview(&response.text().await.unwrap_or_default());
        return Err(AttemptFailure::permanent(FetchError::Status {
            status: status.as_u16(),
            url,
            body,
        }));
    }

    // Read the raw body as text first so a parse failure can be logged
    // with what actually arrived.
    let text = response
        .text()
        .await
        .map_err(|e| AttemptFailure::transient(FetchError::Http(e), None))?;

    serde_json::from_str(&text).map_err(|e| {
        log::warn!(
            "  JSON parse failed for {url} ({} bytes): {e}\n  body preview: {}",
            text.len(),
            preview(&text),
        );
        AttemptFailure::transient(FetchError::Json(e), None)
    })
}

/// Parses a `Retry-After` header given either as delta-seconds or as an
/// HTTP date. Dates in the past yield a zero wait.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
}

fn preview(text: &str) -> String {
    if text.len() > BODY_PREVIEW_LEN {
        let cut: String = text.chars().take(BODY_PREVIEW_LEN).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use reqwest::header::HeaderValue;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(10),
        }
    }

    #[test]
    fn backoff_doubles_from_initial() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(4), Duration::from_millis(4000));
    }

    #[test]
    fn retry_after_overrides_computed_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(3, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(policy.delay_for(3, None), Duration::from_secs(4));
    }

    #[test]
    fn oversized_retry_after_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(99_999_999))),
            MAX_RETRY_AFTER
        );
        assert_eq!(policy.delay_for(1, Some(MAX_RETRY_AFTER)), MAX_RETRY_AFTER);
    }

    #[test]
    fn parses_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(
            parse_retry_after(&headers, Utc::now()),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn parses_retry_after_http_date() {
        let now = DateTime::parse_from_rfc3339("2015-10-21T07:27:50Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(
            parse_retry_after(&headers, now),
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn ignores_garbage_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers, Utc::now()), None);
        assert_eq!(parse_retry_after(&HeaderMap::new(), Utc::now()), None);
    }

    #[test]
    fn preview_truncates_long_bodies() {
        let long = "x".repeat(BODY_PREVIEW_LEN + 10);
        let cut = preview(&long);
        assert_eq!(cut.len(), BODY_PREVIEW_LEN + 3);
        assert!(cut.ends_with("..."));
        assert_eq!(preview("short"), "short");
    }

    #[tokio::test]
    async fn returns_parsed_body_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rows.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"a": 1}])))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/rows.json", server.uri());
        let rows: Vec<serde_json::Value> = send_json(&fast_policy(5), || client.get(&url))
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let server = MockServer::start().await;
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        Mock::given(method("GET"))
            .respond_with(move |_req: &wiremock::Request| -> ResponseTemplate {
                let current = attempts_clone.fetch_add(1, Ordering::SeqCst);
                if current < 2 {
                    ResponseTemplate::new(503)
                } else {
                    ResponseTemplate::new(200).set_body_json(serde_json::json!([]))
                }
            })
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = server.uri();
        let rows: Vec<serde_json::Value> = send_json(&fast_policy(5), || client.get(&url))
            .await
            .unwrap();

        assert!(rows.is_empty());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such dataset"))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = server.uri();
        let err = send_json::<serde_json::Value, _>(&fast_policy(5), || client.get(&url))
            .await
            .unwrap_err();

        match err {
            FetchError::Status { status, body, .. } => {
                assert_eq!(status, 404);
                assert_eq!(body, "no such dataset");
            }
            other => panic!("expected Status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn surfaces_last_error_when_budget_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = server.uri();
        let err = send_json::<serde_json::Value, _>(&fast_policy(3), || client.get(&url))
            .await
            .unwrap_err();

        match &err {
            FetchError::Exhausted { attempts, last } => {
                assert_eq!(*attempts, 3);
                assert_eq!(last.status(), Some(502));
            }
            other => panic!("expected Exhausted error, got {other:?}"),
        }
        assert_eq!(err.status(), Some(502));
    }

    #[tokio::test]
    async fn honours_retry_after_on_rate_limit() {
        let server = MockServer::start().await;
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        Mock::given(method("GET"))
            .respond_with(move |_req: &wiremock::Request| -> ResponseTemplate {
                if attempts_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                    ResponseTemplate::new(429).insert_header("Retry-After", "2")
                } else {
                    ResponseTemplate::new(200).set_body_json(serde_json::json!([]))
                }
            })
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = server.uri();
        let start = Instant::now();
        let _: Vec<serde_json::Value> = send_json(&fast_policy(5), || client.get(&url))
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(
            elapsed >= Duration::from_millis(1900),
            "waited only {elapsed:?}"
        );
        assert!(elapsed < Duration::from_secs(10), "waited {elapsed:?}");
    }

    #[tokio::test]
    async fn retries_malformed_json_bodies() {
        let server = MockServer::start().await;
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        Mock::given(method("GET"))
            .respond_with(move |_req: &wiremock::Request| -> ResponseTemplate {
                if attempts_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                    ResponseTemplate::new(200).set_body_string("[{\"summons_number\": ")
                } else {
                    ResponseTemplate::new(200).set_body_json(serde_json::json!([{"a": 1}]))
                }
            })
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = server.uri();
        let rows: Vec<serde_json::Value> = send_json(&fast_policy(3), || client.get(&url))
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retries_on_network_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = reqwest::Client::new();
        let url = format!("http://{addr}/rows.json");
        let err = send_json::<serde_json::Value, _>(&fast_policy(2), || client.get(&url))
            .await
            .unwrap_err();

        match err {
            FetchError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, FetchError::Http(_)));
            }
            other => panic!("expected Exhausted error, got {other:?}"),
        }
    }
}
