//! Retry wrapper for tenant API calls
//!
//! `send_with_retry()` replaces `request.send()` for every adapter call:
//! - 429 responses are retried with exponential backoff and jitter
//! - 5xx gateway responses are retried only for idempotent methods, since the
//!   server may already have acted on a POST (import jobs, postits)
//! - a numeric `Retry-After` header takes precedence over the computed delay
//! - any other status is handed back to the caller untouched
//!
//! Retries stop early when the request body cannot be replayed (streams).

use reqwest::{Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry settings, embedded in the `retry` section of the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRetryConfig {
    /// Maximum number of retry attempts after the first request
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,
    /// Upper bound for a single delay in milliseconds
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for HttpRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 15_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl HttpRetryConfig {
    /// No retries at all
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Throttling is always safe to retry; gateway failures only when replaying cannot duplicate work
pub(crate) fn should_retry(method: &Method, status: u16) -> bool {
    match status {
        429 => true,
        _ if is_retryable_status(status) => method.is_idempotent(),
        _ => false,
    }
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    let value = response.headers().get("retry-after")?.to_str().ok()?;
    // HTTP-date values fall back to backoff
    let secs = value.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs.min(120)))
}

fn calculate_delay(attempt: u32, config: &HttpRetryConfig) -> Duration {
    let base = config.base_delay_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_delay_ms as f64);
    let jitter = capped * (0.1 + rand::random::<f64>() * 0.2);
    Duration::from_millis((capped + jitter) as u64)
}

/// Send a request, retrying throttled and gateway failures.
///
/// Transport errors are returned immediately; the adapter maps them onto
/// `ProviderError` and decides whether they are recoverable.
pub async fn send_with_retry(
    request: RequestBuilder,
    config: &HttpRetryConfig,
) -> Result<Response, reqwest::Error> {
    let (client, request) = request.build_split();
    let mut pending = request?;
    let method = pending.method().clone();
    let mut attempt = 0;

    loop {
        let replay = pending.try_clone();
        let response = client.execute(pending).await?;
        let status = response.status().as_u16();

        if !should_retry(&method, status) || attempt >= config.max_retries {
            return Ok(response);
        }
        let Some(next) = replay else {
            return Ok(response);
        };

        let delay = parse_retry_after(&response).unwrap_or_else(|| calculate_delay(attempt, config));
        tracing::debug!(
            "{} returned {}, retry {}/{} after {:?}",
            response.url(),
            status,
            attempt + 1,
            config.max_retries,
            delay
        );

        tokio::time::sleep(delay).await;
        pending = next;
        attempt += 1;
    }
}
