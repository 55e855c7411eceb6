//! HTTP client for downstream microservices.
//!
//! Classification:
//! - 2xx with a JSON body: success
//! - any other status: `Rejected(status)`
//! - connect, transport or body errors: `Unreachable`
//!
//! Timeouts are not applied here; the aggregator bounds each call together
//! with its retries.

use crate::errors::AggregatorError;
use crate::models::FailureKind;
use reqwest::header::HeaderMap;
use std::time::Duration;
use tracing::debug;

/// Connect timeout for downstream connections.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Trait for downstream calls (enables mocking).
#[async_trait::async_trait]
pub trait DownstreamClient: Send + Sync {
    /// GET `url` with `headers` and return the JSON body.
    async fn get_json(
        &self,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<serde_json::Value, FailureKind>;
}

/// reqwest-backed client with a shared connection pool.
#[derive(Debug, Clone)]
pub struct HttpDownstreamClient {
    http_client: reqwest::Client,
}

impl HttpDownstreamClient {
    /// # Errors
    ///
    /// Returns `AggregatorError::HttpClient` if the client cannot be built.
    pub fn new() -> Result<Self, AggregatorError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AggregatorError::HttpClient(e.to_string()))?;

        Ok(Self { http_client })
    }
}

#[async_trait::async_trait]
impl DownstreamClient for HttpDownstreamClient {
    async fn get_json(
        &self,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<serde_json::Value, FailureKind> {
        let response = self
            .http_client
            .get(url)
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| {
                debug!(
                    target: "aggregator.downstream",
                    error = %e,
                    url = %url,
                    "Downstream unreachable"
                );
                FailureKind::Unreachable
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FailureKind::Rejected(status.as_u16()));
        }

        response.json().await.map_err(|e| {
            debug!(
                target: "aggregator.downstream",
                error = %e,
                url = %url,
                "Downstream body unreadable"
            );
            FailureKind::Unreachable
        })
    }
}

/// Mock downstream client for tests.
pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Mutex, PoisonError};

    /// How the mock answers one URL.
    #[derive(Debug, Clone)]
    pub enum MockResponse {
        Json(serde_json::Value),
        Fail(FailureKind),
        /// Answer after a delay (drives timeouts).
        Delayed(Duration, Box<MockResponse>),
    }

    /// One request seen by the mock.
    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub url: String,
        pub headers: HeaderMap,
    }

    /// Scripted client keyed by URL.
    ///
    /// Each URL has a queue of responses; the last one repeats once the
    /// queue is drained. Unknown URLs are `Unreachable`.
    #[derive(Debug, Default)]
    pub struct MockDownstreamClient {
        responses: Mutex<HashMap<String, VecDeque<MockResponse>>>,
        calls: Mutex<Vec<RecordedCall>>,
    }

    impl MockDownstreamClient {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue `responses` for `url`, in order.
        #[must_use]
        pub fn on(self, url: &str, responses: Vec<MockResponse>) -> Self {
            self.responses
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(url.to_string(), responses.into());
            self
        }

        #[must_use]
        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        #[must_use]
        pub fn call_count(&self, url: &str) -> usize {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|call| call.url == url)
                .count()
        }

        fn next_response(&self, url: &str) -> Option<MockResponse> {
            let mut responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
            let queue = responses.get_mut(url)?;
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        }
    }

    #[async_trait::async_trait]
    impl DownstreamClient for MockDownstreamClient {
        async fn get_json(
            &self,
            url: &str,
            headers: &HeaderMap,
        ) -> Result<serde_json::Value, FailureKind> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(RecordedCall {
                    url: url.to_string(),
                    headers: headers.clone(),
                });

            let mut response = self.next_response(url);
            loop {
                match response {
                    None => return Err(FailureKind::Unreachable),
                    Some(MockResponse::Json(value)) => return Ok(value),
                    Some(MockResponse::Fail(kind)) => return Err(kind),
                    Some(MockResponse::Delayed(delay, inner)) => {
                        tokio::time::sleep(delay).await;
                        response = Some(*inner);
                    }
                }
            }
        }
    }
}
