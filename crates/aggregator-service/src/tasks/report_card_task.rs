//! Periodic report card aggregation under the aggregator's own identity.
//!
//! A downstream rejection usually means the service token was revoked or
//! its signing key rotated out, so the task asks the token manager for a
//! new one and carries on at the next tick.

use crate::errors::AggregatorError;
use crate::models::{FailureKind, Identity};
use crate::observability::metrics::{record_token_refresh_request, set_report_cards};
use crate::services::ReportCardService;
use common::token_manager::TokenReceiver;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What one aggregation cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Cards built, or `None` if the cycle failed.
    pub cards: Option<usize>,
    /// Whether a token re-acquisition was requested.
    pub refresh_requested: bool,
}

fn any_rejected(failures: &BTreeMap<String, FailureKind>) -> bool {
    failures
        .values()
        .any(|kind| matches!(kind, FailureKind::Rejected(_)))
}

/// Run one aggregation with the current service token.
pub async fn run_report_card_cycle(
    service: &ReportCardService,
    token_receiver: &TokenReceiver,
    client_id: &str,
) -> CycleReport {
    let identity = Identity::service(client_id, token_receiver.token());

    let (cards, rejected) = match service.build(&identity).await {
        Ok(response) => {
            let count = response.report_cards.len();
            set_report_cards(count);
            info!(
                target: "aggregator.tasks.report_cards",
                cards = count,
                failures = response.failures.len(),
                "Report card aggregation complete"
            );
            (Some(count), any_rejected(&response.failures))
        }
        Err(AggregatorError::RequiredTargetFailed {
            target,
            kind,
            partial,
        }) => {
            warn!(
                target: "aggregator.tasks.report_cards",
                service = %target,
                kind = %kind,
                "Report card aggregation failed"
            );
            (None, any_rejected(&partial.failures()))
        }
        Err(e) => {
            warn!(
                target: "aggregator.tasks.report_cards",
                error = %e,
                "Report card aggregation failed"
            );
            (None, false)
        }
    };

    if rejected {
        warn!(
            target: "aggregator.tasks.report_cards",
            "Downstream rejected the service token, requesting re-authentication"
        );
        token_receiver.request_refresh();
        record_token_refresh_request();
    }

    CycleReport {
        cards,
        refresh_requested: rejected,
    }
}

/// Run the aggregation loop until `cancel_token` fires.
pub async fn start_report_card_task(
    service: Arc<ReportCardService>,
    token_receiver: TokenReceiver,
    client_id: String,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "aggregator.tasks.report_cards",
        interval_secs = interval.as_secs(),
        "Report card task started"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_report_card_cycle(&service, &token_receiver, &client_id).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "aggregator.tasks.report_cards",
                    "Report card task received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}
