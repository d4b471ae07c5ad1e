//! The inbound webhook.
//!
//! Alerts arrive as form-urlencoded bodies whose first key is the raw
//! pipe-delimited alert; the value is ignored.

use crate::internal_metrics::Metrics;
use crate::normalizer::AlertNormalizer;
use crate::outputs::Publisher;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Form, Router,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const ACK_BODY: &str = "Log received and formatted for Wazuh";
pub const STORE_ERROR_BODY: &str = "Error appending log data";

/// State shared by every webhook request.
pub struct RelayState {
    pub normalizer: AlertNormalizer,
    pub publisher: Publisher,
    pub metrics: Arc<Metrics>,
}

/// Builds the relay router with the webhook mounted at `webhook_path`.
pub fn router(state: Arc<RelayState>, webhook_path: &str) -> Router {
    Router::new()
        .route(webhook_path, post(receive_alert))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

async fn receive_alert(
    State(state): State<Arc<RelayState>>,
    Form(fields): Form<Vec<(String, String)>>,
) -> impl IntoResponse {
    state.metrics.alerts_received_total.increment(1);

    let Some((message, _)) = fields.into_iter().next() else {
        warn!("Received webhook without an alert");
        state.metrics.alerts_rejected_total.increment(1);
        return (StatusCode::BAD_REQUEST, "Missing alert".to_string());
    };

    let alert = match state.normalizer.normalize(&message).await {
        Ok(alert) => alert,
        Err(e) => {
            warn!(error = %e, "Rejected malformed alert");
            state.metrics.alerts_rejected_total.increment(1);
            return (StatusCode::BAD_REQUEST, format!("Invalid alert: {}", e));
        }
    };

    match state.publisher.publish(&alert).await {
        Ok(dispatched) => {
            info!(dispatched, "Alert stored, collector transmissions dispatched");
            (StatusCode::OK, ACK_BODY.to_string())
        }
        Err(e) => {
            error!(error = %e, "Error appending log data");
            (StatusCode::INTERNAL_SERVER_ERROR, STORE_ERROR_BODY.to_string())
        }
    }
}
