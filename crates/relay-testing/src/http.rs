//! Mock callback endpoint backed by wiremock.

use std::time::Duration;

use serde_json::Value;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Canned response of the callback endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum MockResponse {
    /// 200 with an empty JSON object.
    Ok,
    /// 429 with an optional `Retry-After` header value.
    RateLimited {
        /// Raw header value, e.g. `"2"` or `"0.5"`
        retry_after: Option<String>,
    },
    /// Any other status.
    Status(u16),
    /// 200 sent after a delay, to trigger client timeouts.
    Slow(Duration),
}

impl MockResponse {
    fn template(&self) -> ResponseTemplate {
        match self {
            Self::Ok => ResponseTemplate::new(200).set_body_json(serde_json::json!({})),
            Self::RateLimited { retry_after } => {
                let response = ResponseTemplate::new(429);
                match retry_after {
                    Some(value) => response.insert_header("Retry-After", value.as_str()),
                    None => response,
                }
            },
            Self::Status(code) => ResponseTemplate::new(*code),
            Self::Slow(delay) => ResponseTemplate::new(200).set_delay(*delay),
        }
    }

    /// 429 with `Retry-After: seconds`.
    pub fn rate_limited(seconds: &str) -> Self {
        Self::RateLimited { retry_after: Some(seconds.to_string()) }
    }
}

/// A callback API stand-in.
///
/// Responses for one callback path are played in order; once the sequence is
/// exhausted the last response repeats.
pub struct MockCallback {
    server: MockServer,
}

impl MockCallback {
    /// Starts a server on a random port.
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Base URL to use as the delivery client's `api_base`.
    pub fn api_base(&self) -> String {
        self.server.uri()
    }

    /// Path a delivery for `(origin_id, token)` is posted to.
    pub fn callback_path(origin_id: &str, token: &str) -> String {
        format!("/webhooks/{origin_id}/{token}")
    }

    /// Scripts the responses for one callback path.
    pub async fn respond_in_sequence(
        &self,
        origin_id: &str,
        token: &str,
        responses: impl IntoIterator<Item = MockResponse>,
    ) {
        let route = Self::callback_path(origin_id, token);
        let responses: Vec<MockResponse> = responses.into_iter().collect();
        let Some((last, steps)) = responses.split_last() else {
            return;
        };

        for (i, response) in steps.iter().enumerate() {
            Mock::given(method("POST"))
                .and(path(route.as_str()))
                .respond_with(response.template())
                .up_to_n_times(1)
                .with_priority(u8::try_from(i + 1).unwrap_or(u8::MAX - 1))
                .mount(&self.server)
                .await;
        }

        Mock::given(method("POST"))
            .and(path(route.as_str()))
            .respond_with(last.template())
            .with_priority(u8::MAX)
            .mount(&self.server)
            .await;
    }

    /// Responds to every callback path with `response`.
    pub async fn respond_always(&self, response: MockResponse) {
        Mock::given(method("POST"))
            .respond_with(response.template())
            .with_priority(u8::MAX)
            .mount(&self.server)
            .await;
    }

    /// JSON bodies posted to one callback path, in arrival order.
    pub async fn bodies(&self, origin_id: &str, token: &str) -> Vec<Value> {
        let route = Self::callback_path(origin_id, token);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == route)
            .filter_map(|r| serde_json::from_slice(&r.body).ok())
            .collect()
    }

    /// Polls until at least `count` bodies arrived on one callback path or
    /// `timeout` passes, returning what arrived.
    pub async fn wait_for_bodies(
        &self,
        origin_id: &str,
        token: &str,
        count: usize,
        timeout: Duration,
    ) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let bodies = self.bodies(origin_id, token).await;
            if bodies.len() >= count || tokio::time::Instant::now() >= deadline {
                return bodies;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Total number of requests received.
    pub async fn request_count(&self) -> usize {
        self.server.received_requests().await.map_or(0, |r| r.len())
    }
}
