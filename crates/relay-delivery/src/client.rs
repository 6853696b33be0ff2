//! HTTP client for callback delivery with rate-limit handling.
//!
//! One `deliver` call makes up to `max_retries + 1` HTTP attempts against the
//! callback endpoint. 429 responses are waited out according to their
//! `Retry-After` header without consuming an attempt; the number of such
//! waits per call is capped so a misbehaving endpoint cannot pin a worker.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use relay_core::{Clock, InteractionRequest};
use reqwest::{header::HeaderMap, StatusCode};
use serde_json::json;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    error::{DeliveryError, Result},
    retry::RetryPolicy,
};

/// Flag value that makes a message visible only to the requester.
pub const EPHEMERAL_FLAG: u64 = 64;

/// Wait applied when a 429 has no usable `Retry-After` header.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Longest single wait a `Retry-After` header can request.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

const ELLIPSIS: &str = "...";
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Configuration for the callback delivery client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the callback API, without trailing slash.
    pub api_base: String,
    /// Timeout for each delivery attempt.
    pub timeout: Duration,
    /// Timeout for the single error-notice attempt.
    pub notice_timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum 429 waits within one delivery call.
    pub max_rate_limit_waits: u32,
    /// Content longer than this many characters is truncated.
    pub max_content_length: usize,
    /// Delays between failed attempts within one call.
    pub retry_policy: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: "https://discord.com/api/v10".to_string(),
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            notice_timeout: Duration::from_secs(10),
            user_agent: concat!("callback-relay/", env!("CARGO_PKG_VERSION")).to_string(),
            max_rate_limit_waits: 10,
            max_content_length: crate::DEFAULT_MAX_CONTENT_LENGTH,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Where a result is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackTarget {
    /// Application the callback belongs to.
    pub origin_id: String,
    /// Interaction token addressing the callback.
    pub callback_token: String,
}

impl CallbackTarget {
    /// Creates a target.
    pub fn new(origin_id: impl Into<String>, callback_token: impl Into<String>) -> Self {
        Self { origin_id: origin_id.into(), callback_token: callback_token.into() }
    }

    /// Callback URL under `api_base`.
    pub fn url(&self, api_base: &str) -> String {
        format!(
            "{}/webhooks/{}/{}",
            api_base.trim_end_matches('/'),
            self.origin_id,
            self.callback_token
        )
    }

    fn token_prefix(&self) -> String {
        self.callback_token.chars().take(8).collect()
    }
}

impl From<&InteractionRequest> for CallbackTarget {
    fn from(request: &InteractionRequest) -> Self {
        let details = request.details();
        Self::new(&details.origin_id, &details.callback_token)
    }
}

/// Outcome of a successful delivery call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// HTTP attempts consumed, including the successful one.
    pub attempts: u32,
    /// 429 responses waited out along the way.
    pub rate_limit_waits: u32,
}

/// Callback delivery client.
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
}

impl DeliveryClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the base URL is empty or
    /// the HTTP client cannot be built.
    pub fn new(config: ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.api_base.trim().is_empty() {
            return Err(DeliveryError::configuration("api_base must not be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config, clock })
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Delivers `content` to `target`.
    ///
    /// Success is exactly HTTP 200. A 429 waits for its `Retry-After` and
    /// tries again without consuming an attempt. Any other status, a timeout
    /// or a transport error consumes one attempt; if attempts remain the call
    /// waits `retry_policy.delay_for(attempt_index)` before the next one.
    ///
    /// # Errors
    ///
    /// - `RetriesExhausted` once `max_retries + 1` attempts have failed
    /// - `RateLimited` once more than `max_rate_limit_waits` 429s were seen
    pub async fn deliver(
        &self,
        target: &CallbackTarget,
        content: &str,
        max_retries: u32,
    ) -> Result<DeliveryReceipt> {
        let url = target.url(&self.config.api_base);
        let body = json!({ "content": truncate_content(content, self.config.max_content_length) });
        let allowed_attempts = max_retries.saturating_add(1);

        let span = info_span!(
            "callback_delivery",
            origin_id = %target.origin_id,
            token = %target.token_prefix(),
            max_retries
        );

        async move {
            let mut failed_attempts = 0u32;
            let mut rate_limit_waits = 0u32;

            loop {
                let attempt = failed_attempts + 1;
                let error = match self.post(&url, &body, self.config.timeout).await {
                    Ok((StatusCode::OK, _, _)) => {
                        info!(attempt, rate_limit_waits, "callback delivered");
                        return Ok(DeliveryReceipt { attempts: attempt, rate_limit_waits });
                    },
                    Ok((StatusCode::TOO_MANY_REQUESTS, headers, _)) => {
                        let wait = retry_after(&headers, self.clock.now_system());
                        if rate_limit_waits >= self.config.max_rate_limit_waits {
                            warn!(rate_limit_waits, "rate limit wait cap reached");
                            return Err(DeliveryError::rate_limited(rate_limit_waits, wait));
                        }
                        rate_limit_waits += 1;
                        warn!(
                            attempt,
                            retry_after_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                            "rate limited by callback endpoint"
                        );
                        self.clock.sleep(wait).await;
                        continue;
                    },
                    Ok((status, _, body)) => {
                        warn!(attempt, status_code = status.as_u16(), "callback rejected");
                        DeliveryError::http_status(status.as_u16(), body)
                    },
                    Err(error) => {
                        warn!(attempt, error = %error, "callback attempt failed");
                        error
                    },
                };

                failed_attempts += 1;
                if failed_attempts >= allowed_attempts {
                    return Err(DeliveryError::retries_exhausted(failed_attempts, &error));
                }

                let delay = self.config.retry_policy.delay_for(failed_attempts - 1);
                debug!(attempt, delay_ms = delay.as_millis(), "waiting before next attempt");
                self.clock.sleep(delay).await;
            }
        }
        .instrument(span)
        .await
    }

    /// Sends a single ephemeral notice to the requester.
    ///
    /// Never retried. Callers log the error and move on.
    ///
    /// # Errors
    ///
    /// Returns the transport error or `HttpStatus` for anything but 200.
    pub async fn notify_failure(&self, target: &CallbackTarget, message: &str) -> Result<()> {
        let url = target.url(&self.config.api_base);
        let body = json!({ "content": message, "flags": EPHEMERAL_FLAG });

        match self.post(&url, &body, self.config.notice_timeout).await? {
            (StatusCode::OK, _, _) => {
                info!(token = %target.token_prefix(), "failure notice sent");
                Ok(())
            },
            (status, _, body) => Err(DeliveryError::http_status(status.as_u16(), body)),
        }
    }

    async fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<(StatusCode, HeaderMap, String)> {
        let response =
            self.client.post(url).timeout(timeout).json(body).send().await.map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::timeout(timeout)
                } else {
                    DeliveryError::network(e.to_string())
                }
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = match response.text().await {
            Ok(text) => truncate_content(&text, MAX_ERROR_BODY_CHARS),
            Err(e) => format!("[failed to read response body: {e}]"),
        };

        Ok((status, headers, text))
    }
}

/// Shortens `content` to at most `max_chars` characters, marking the cut
/// with an ellipsis.
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut truncated: String = content.chars().take(keep).collect();
    truncated.push_str(&ELLIPSIS[..max_chars.min(ELLIPSIS.len())]);
    truncated
}

/// Wait requested by a 429 response.
///
/// Accepts fractional seconds or an HTTP date. Missing, negative or
/// unparseable values fall back to [`DEFAULT_RETRY_AFTER`]; anything longer
/// than [`MAX_RETRY_AFTER`] is clamped to it.
pub fn retry_after(headers: &HeaderMap, now: SystemTime) -> Duration {
    let Some(raw) = headers.get(reqwest::header::RETRY_AFTER).and_then(|v| v.to_str().ok())
    else {
        return DEFAULT_RETRY_AFTER;
    };
    parse_retry_after(raw, now).unwrap_or(DEFAULT_RETRY_AFTER)
}

fn parse_retry_after(raw: &str, now: SystemTime) -> Option<Duration> {
    let raw = raw.trim();
    if let Ok(seconds) = raw.parse::<f64>() {
        if !seconds.is_finite() || seconds < 0.0 {
            return None;
        }
        return Duration::try_from_secs_f64(seconds.min(MAX_RETRY_AFTER.as_secs_f64())).ok();
    }

    let at = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    let at = SystemTime::from(at.with_timezone(&chrono::Utc));
    Some(at.duration_since(now).unwrap_or_default().min(MAX_RETRY_AFTER))
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderValue, RETRY_AFTER};

    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn retry_after_accepts_fractional_seconds() {
        let now = SystemTime::now();
        assert_eq!(retry_after(&headers("2"), now), Duration::from_secs(2));
        assert_eq!(retry_after(&headers("0.25"), now), Duration::from_millis(250));
        assert_eq!(retry_after(&headers(" 3 "), now), Duration::from_secs(3));
    }

    #[test]
    fn retry_after_falls_back_to_one_second() {
        let now = SystemTime::now();
        assert_eq!(retry_after(&HeaderMap::new(), now), DEFAULT_RETRY_AFTER);
        assert_eq!(retry_after(&headers("soon"), now), DEFAULT_RETRY_AFTER);
        assert_eq!(retry_after(&headers("-4"), now), DEFAULT_RETRY_AFTER);
    }

    #[test]
    fn oversized_retry_after_is_clamped() {
        let now = SystemTime::now();
        assert_eq!(retry_after(&headers("1e30"), now), MAX_RETRY_AFTER);
        assert_eq!(retry_after(&headers("99999999999999999999"), now), MAX_RETRY_AFTER);
        assert_eq!(retry_after(&headers("inf"), now), DEFAULT_RETRY_AFTER);
        assert_eq!(retry_after(&headers("NaN"), now), DEFAULT_RETRY_AFTER);

        let far_future = headers("Fri, 31 Dec 9999 23:59:59 GMT");
        assert_eq!(retry_after(&far_future, now), MAX_RETRY_AFTER);
    }

    #[test]
    fn retry_after_accepts_http_date() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(784_111_777);
        // Sun, 06 Nov 1994 08:49:37 GMT is 784111777
        let later = headers("Sun, 06 Nov 1994 08:49:47 GMT");
        assert_eq!(retry_after(&later, now), Duration::from_secs(10));

        let past = headers("Sun, 06 Nov 1994 08:49:30 GMT");
        assert_eq!(retry_after(&past, now), Duration::ZERO);
    }

    #[test]
    fn truncation_respects_character_boundaries() {
        assert_eq!(truncate_content("short", 10), "short");
        assert_eq!(truncate_content("abcdefghij", 10), "abcdefghij");
        assert_eq!(truncate_content("abcdefghijk", 10), "abcdefg...");

        let accented = "é".repeat(20);
        let cut = truncate_content(&accented, 8);
        assert_eq!(cut.chars().count(), 8);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn target_url_joins_cleanly() {
        let target = CallbackTarget::new("app", "tok");
        assert_eq!(
            target.url("http://localhost:9/api/"),
            "http://localhost:9/api/webhooks/app/tok"
        );
    }

    #[test]
    fn empty_api_base_is_rejected() {
        let config = ClientConfig { api_base: " ".to_string(), ..ClientConfig::default() };
        let err = DeliveryClient::new(config, Arc::new(relay_core::RealClock::new())).unwrap_err();
        assert!(matches!(err, DeliveryError::Configuration { .. }));
    }
}
