//! Concurrent fan-out to downstream services.
//!
//! Every call runs concurrently under its own timeout, which also bounds
//! that call's retries. The aggregation returns once each call has either
//! finished or timed out, so total latency follows the slowest call rather
//! than the sum of all of them.

use crate::config::PropagationMode;
use crate::errors::AggregatorError;
use crate::models::{AggregationResult, CallOutcome, CallSpec, FailureKind, Identity};
use crate::observability::metrics::{record_aggregation, record_downstream_call};
use crate::services::downstream_client::DownstreamClient;
use common::secret::ExposeSecret;
use common::token_manager::TokenReceiver;
use futures::future::join_all;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

pub const X_FORWARDED_SUBJECT: HeaderName = HeaderName::from_static("x-forwarded-subject");
pub const X_FORWARDED_CLIENT_ID: HeaderName = HeaderName::from_static("x-forwarded-client-id");

/// First retry delay; doubles per attempt.
const INITIAL_RETRY_BACKOFF: Duration = Duration::from_millis(50);

const MAX_RETRY_BACKOFF: Duration = Duration::from_millis(800);

pub struct Aggregator {
    client: Arc<dyn DownstreamClient>,
    /// Base URL per target name.
    targets: HashMap<String, String>,
    propagation: PropagationMode,
    service_token: TokenReceiver,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("targets", &self.targets)
            .field("propagation", &self.propagation)
            .finish_non_exhaustive()
    }
}

/// `base` + `path`, with exactly one slash between them.
fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

impl Aggregator {
    #[must_use]
    pub fn new(
        client: Arc<dyn DownstreamClient>,
        targets: HashMap<String, String>,
        propagation: PropagationMode,
        service_token: TokenReceiver,
    ) -> Self {
        Self {
            client,
            targets,
            propagation,
            service_token,
        }
    }

    #[must_use]
    pub fn propagation(&self) -> PropagationMode {
        self.propagation
    }

    #[must_use]
    pub fn has_target(&self, target: &str) -> bool {
        self.targets.contains_key(target)
    }

    /// Whether the service token has been acquired.
    #[must_use]
    pub fn has_service_token(&self) -> bool {
        !self.service_token.token().expose_secret().is_empty()
    }

    /// Run `calls` concurrently on behalf of `identity`.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` - duplicate or unknown target names, checked before
    ///   any call is made
    /// - `RequiredTargetFailed` - a required target failed; the error
    ///   carries every outcome
    #[instrument(skip_all, name = "aggregator.fanout", fields(calls = calls.len()))]
    pub async fn aggregate(
        &self,
        identity: &Identity,
        calls: &[CallSpec],
    ) -> Result<AggregationResult, AggregatorError> {
        let mut seen = HashSet::new();
        for call in calls {
            if !seen.insert(call.target.as_str()) {
                return Err(AggregatorError::InvalidRequest(format!(
                    "Duplicate target '{}'",
                    call.target
                )));
            }
            if !self.has_target(&call.target) {
                return Err(AggregatorError::InvalidRequest(format!(
                    "Unknown target '{}'",
                    call.target
                )));
            }
        }

        let headers = self.propagation_headers(identity)?;
        let start = Instant::now();

        let outcomes = join_all(calls.iter().map(|call| self.run_call(call, &headers))).await;

        let mut result = AggregationResult::default();
        let mut required_failure = None;
        for (call, outcome) in calls.iter().zip(outcomes) {
            if call.required && required_failure.is_none() {
                if let Some(kind) = outcome.failure() {
                    required_failure = Some((call.target.clone(), kind));
                }
            }
            result.insert(call.target.clone(), outcome);
        }

        match required_failure {
            Some((target, kind)) => {
                record_aggregation("failed", start.elapsed());
                warn!(
                    target: "aggregator.fanout",
                    service = %target,
                    kind = kind.as_str(),
                    "Required downstream failed"
                );
                Err(AggregatorError::RequiredTargetFailed {
                    target,
                    kind,
                    partial: result,
                })
            }
            None => {
                let status = if result.failures().is_empty() { "complete" } else { "partial" };
                record_aggregation(status, start.elapsed());
                Ok(result)
            }
        }
    }

    /// Credential headers for downstream calls.
    fn propagation_headers(&self, identity: &Identity) -> Result<HeaderMap, AggregatorError> {
        let mut headers = HeaderMap::new();

        let bearer = match self.propagation {
            PropagationMode::Forward => identity.bearer.clone(),
            PropagationMode::ServiceToken => {
                if let Some(value) = identity
                    .subject
                    .as_deref()
                    .and_then(|s| HeaderValue::from_str(s).ok())
                {
                    headers.insert(X_FORWARDED_SUBJECT, value);
                }
                if let Ok(value) = HeaderValue::from_str(&identity.client_id) {
                    headers.insert(X_FORWARDED_CLIENT_ID, value);
                }
                self.service_token.token()
            }
        };

        let mut authorization = HeaderValue::from_str(&format!("Bearer {}", bearer.expose_secret()))
            .map_err(|_| AggregatorError::Unauthorized("Invalid bearer token".to_string()))?;
        authorization.set_sensitive(true);
        headers.insert(AUTHORIZATION, authorization);

        Ok(headers)
    }

    async fn run_call(&self, call: &CallSpec, headers: &HeaderMap) -> CallOutcome {
        let Some(base) = self.targets.get(&call.target) else {
            return CallOutcome::Failure(FailureKind::Unreachable);
        };
        let url = join_url(base, &call.path);
        let start = Instant::now();

        let outcome = match tokio::time::timeout(
            call.timeout,
            self.call_with_retries(&url, headers, call.retries),
        )
        .await
        {
            Ok(Ok(payload)) => CallOutcome::Success(payload),
            Ok(Err(kind)) => CallOutcome::Failure(kind),
            Err(_) => CallOutcome::Failure(FailureKind::Timeout),
        };

        let label = outcome.failure().map_or("success", FailureKind::as_str);
        record_downstream_call(&call.target, label, start.elapsed());
        debug!(
            target: "aggregator.fanout",
            service = %call.target,
            outcome = label,
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Downstream call finished"
        );

        outcome
    }

    /// Only `Unreachable` is retried; a rejection is an answer.
    async fn call_with_retries(
        &self,
        url: &str,
        headers: &HeaderMap,
        retries: u32,
    ) -> Result<serde_json::Value, FailureKind> {
        let mut backoff = INITIAL_RETRY_BACKOFF;
        let mut attempt = 0;

        loop {
            match self.client.get_json(url, headers).await {
                Err(FailureKind::Unreachable) if attempt < retries => {
                    attempt += 1;
                    debug!(
                        target: "aggregator.fanout",
                        attempt,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        "Retrying unreachable downstream"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_RETRY_BACKOFF);
                }
                other => return other,
            }
        }
    }
}
