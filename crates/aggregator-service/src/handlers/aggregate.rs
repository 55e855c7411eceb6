use crate::errors::AggregatorError;
use crate::models::{AggregateRequest, AggregationResult, CallSpec, Identity};
use crate::routes::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::{Extension, Json};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Upper bound on a caller-supplied per-call timeout.
pub const MAX_CALL_TIMEOUT_MS: u64 = 10_000;

/// Upper bound on calls per request.
pub const MAX_CALLS: usize = 16;

fn to_call_specs(
    request: AggregateRequest,
    state: &AppState,
) -> Result<Vec<CallSpec>, AggregatorError> {
    if request.calls.is_empty() {
        return Err(AggregatorError::InvalidRequest("calls must not be empty".to_string()));
    }
    if request.calls.len() > MAX_CALLS {
        return Err(AggregatorError::InvalidRequest(format!(
            "at most {MAX_CALLS} calls per request"
        )));
    }

    request
        .calls
        .into_iter()
        .map(|call| {
            if !call.path.starts_with('/') || call.path.contains("..") {
                return Err(AggregatorError::InvalidRequest(format!(
                    "Invalid path for target '{}'",
                    call.target
                )));
            }

            let timeout = match call.timeout_ms {
                None => state.config.downstream_timeout,
                Some(ms) if (1..=MAX_CALL_TIMEOUT_MS).contains(&ms) => Duration::from_millis(ms),
                Some(_) => {
                    return Err(AggregatorError::InvalidRequest(format!(
                        "timeout_ms must be between 1 and {MAX_CALL_TIMEOUT_MS}"
                    )))
                }
            };

            Ok(CallSpec::new(&call.target, &call.path, timeout)
                .required(call.required)
                .with_retries(state.config.downstream_retries))
        })
        .collect()
}

/// POST /api/v1/aggregate
///
/// Generic fan-out over configured targets; answers the raw outcome map.
#[instrument(skip_all, name = "aggregator.aggregate")]
pub async fn handle_aggregate(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<AggregateRequest>, JsonRejection>,
) -> Result<Json<AggregationResult>, AggregatorError> {
    let Json(request) = payload.map_err(|e| AggregatorError::InvalidRequest(e.body_text()))?;
    let calls = to_call_specs(request, &state)?;

    let result = state.aggregator.aggregate(&identity, &calls).await?;
    Ok(Json(result))
}
