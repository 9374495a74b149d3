//! Stripe webhook ingress.

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use secrecy::ExposeSecret;
use tracing::{error, info, warn};

use crate::{
    adapters::http::app_state::AppState,
    app_error::{AppError, AppResult},
    infra::{stripe_billing_adapter::parse_billing_event, stripe_client::verify_webhook_signature},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook", post(handle_webhook))
}

/// Returns 500 so Stripe redelivers the event.
fn webhook_retryable_error(error: &AppError, event_type: &str, event_id: &str) -> StatusCode {
    error!(
        error = %error,
        event_type,
        event_id,
        retryable = true,
        "Webhook processing failed, returning 500 for Stripe retry"
    );
    StatusCode::INTERNAL_SERVER_ERROR
}

/// POST /api/billing/webhook
///
/// Signature and payload problems are rejected with 400. Once parsed, only
/// retryable failures produce a 5xx; everything else is acknowledged.
async fn handle_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> AppResult<StatusCode> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::InvalidInput("Missing Stripe signature".into()))?;

    verify_webhook_signature(
        &body,
        signature,
        app_state.config.stripe_webhook_secret.expose_secret(),
        app_state.config.webhook_tolerance_secs,
        app_state.clock.now(),
    )?;

    let event = parse_billing_event(&body)?;

    match app_state.webhook_reconciler.handle(&event).await {
        Ok(outcome) => {
            info!(
                event_id = %event.id,
                event_type = event.event_type(),
                outcome = ?outcome,
                "Webhook acknowledged"
            );
            Ok(StatusCode::OK)
        }
        Err(err) if err.is_retryable() => Ok(webhook_retryable_error(
            &err,
            event.event_type(),
            &event.id,
        )),
        Err(err) => {
            warn!(
                error = %err,
                event_id = %event.id,
                event_type = event.event_type(),
                "Webhook dropped after non-retryable failure"
            );
            Ok(StatusCode::OK)
        }
    }
}
