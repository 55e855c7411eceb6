//! Aggregation request/result types and the report card domain.

use common::jwt::{self, JwtValidationError};
use common::secret::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Who the aggregation runs on behalf of.
///
/// Built from a token the proxy already admitted; the claims are decoded,
/// not re-verified.
#[derive(Clone)]
pub struct Identity {
    pub subject: Option<String>,
    pub client_id: String,
    pub bearer: SecretString,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("subject", &self.subject.as_ref().map(|_| "[REDACTED]"))
            .field("client_id", &self.client_id)
            .field("bearer", &"[REDACTED]")
            .finish()
    }
}

impl Identity {
    /// Decode the caller's identity from a raw bearer token.
    ///
    /// # Errors
    ///
    /// Returns `MalformedToken` when the token does not decode.
    pub fn from_bearer(token: &str) -> Result<Self, JwtValidationError> {
        let claims = jwt::decode(token)?;
        Ok(Self {
            subject: claims.sub,
            client_id: claims.client_id,
            bearer: SecretString::from(token.to_string()),
        })
    }

    /// Identity of the aggregator acting for itself.
    #[must_use]
    pub fn service(client_id: &str, bearer: SecretString) -> Self {
        Self {
            subject: Some(client_id.to_string()),
            client_id: client_id.to_string(),
            bearer,
        }
    }
}

/// One downstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSpec {
    /// Configured target name, also the key in the result.
    pub target: String,
    pub path: String,
    /// Covers the call and all of its retries.
    pub timeout: Duration,
    /// A failure of a required target fails the whole aggregation.
    pub required: bool,
    /// Retries after an unreachable downstream.
    pub retries: u32,
}

impl CallSpec {
    #[must_use]
    pub fn new(target: &str, path: &str, timeout: Duration) -> Self {
        Self {
            target: target.to_string(),
            path: path.to_string(),
            timeout,
            required: false,
            retries: 0,
        }
    }

    #[must_use]
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// Why a downstream call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Unreachable,
    /// The downstream answered with a non-2xx status.
    Rejected(u16),
}

impl FailureKind {
    /// Metrics label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Unreachable => "unreachable",
            FailureKind::Rejected(_) => "rejected",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Rejected(status) => write!(f, "rejected with status {status}"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "data", rename_all = "snake_case")]
pub enum CallOutcome {
    Success(serde_json::Value),
    Failure(FailureKind),
}

impl CallOutcome {
    #[must_use]
    pub fn failure(&self) -> Option<FailureKind> {
        match self {
            CallOutcome::Success(_) => None,
            CallOutcome::Failure(kind) => Some(*kind),
        }
    }
}

/// Outcome per target, ordered by target name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AggregationResult {
    outcomes: BTreeMap<String, CallOutcome>,
}

impl AggregationResult {
    pub(crate) fn insert(&mut self, target: String, outcome: CallOutcome) {
        self.outcomes.insert(target, outcome);
    }

    #[must_use]
    pub fn get(&self, target: &str) -> Option<&CallOutcome> {
        self.outcomes.get(target)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Failed targets and why.
    #[must_use]
    pub fn failures(&self) -> BTreeMap<String, FailureKind> {
        self.outcomes
            .iter()
            .filter_map(|(target, outcome)| outcome.failure().map(|kind| (target.clone(), kind)))
            .collect()
    }

    /// Success payload of `target`, if it succeeded.
    #[must_use]
    pub fn payload(&self, target: &str) -> Option<&serde_json::Value> {
        match self.outcomes.get(target) {
            Some(CallOutcome::Success(payload)) => Some(payload),
            _ => None,
        }
    }
}

// ============================================================================
// Report cards
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub surname: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grade {
    pub id: i64,
    #[serde(alias = "studentId")]
    pub student_id: i64,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportCard {
    /// `name surname`
    pub student: String,
    pub grades: Vec<Grade>,
}

/// Downstream list envelope: `{"result": [...]}`.
#[derive(Debug, Deserialize)]
pub struct ListResponse<T> {
    pub result: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct ReportCardsResponse {
    pub report_cards: Vec<ReportCard>,
    /// Non-required targets that failed; their data is missing above.
    pub failures: BTreeMap<String, FailureKind>,
}

/// Body of `POST /api/v1/aggregate`.
#[derive(Debug, Deserialize)]
pub struct AggregateRequest {
    pub calls: Vec<AggregateCall>,
}

#[derive(Debug, Deserialize)]
pub struct AggregateCall {
    pub target: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub required: bool,
    /// Defaults to the configured downstream timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_path() -> String {
    "/".to_string()
}
