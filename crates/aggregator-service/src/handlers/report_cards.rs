use crate::errors::AggregatorError;
use crate::models::{Identity, ReportCardsResponse};
use crate::routes::AppState;
use axum::extract::State;
use axum::{Extension, Json};
use std::sync::Arc;
use tracing::instrument;

/// GET /api/v1/report-cards
///
/// 502 when students (or grades, if configured as required) fail; a grades
/// failure otherwise shows up under `failures` with empty grade lists.
#[instrument(skip_all, name = "aggregator.report_cards")]
pub async fn handle_report_cards(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ReportCardsResponse>, AggregatorError> {
    let response = state.report_cards.build(&identity).await?;

    tracing::info!(
        target: "aggregator.report_cards",
        cards = response.report_cards.len(),
        failures = response.failures.len(),
        "Report cards built"
    );

    Ok(Json(response))
}
