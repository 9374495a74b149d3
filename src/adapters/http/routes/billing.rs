use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    adapters::http::app_state::AppState,
    app_error::AppResult,
    domain::entities::{billing_subscription::PaymentMethodId, plan::Plan},
};

#[derive(Deserialize)]
struct PlanChangePayload {
    plan: Plan,
}

#[derive(Deserialize)]
struct DefaultPaymentMethodPayload {
    payment_method_id: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{user_id}/plan", post(change_plan))
        .route("/{user_id}/subscription", get(subscription_snapshot))
        .route(
            "/{user_id}/payment-methods/default",
            put(set_default_payment_method),
        )
        .route(
            "/{user_id}/payment-methods/{payment_method_id}",
            delete(remove_payment_method),
        )
}

/// POST /api/users/{user_id}/plan
async fn change_plan(
    State(app_state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<PlanChangePayload>,
) -> AppResult<impl IntoResponse> {
    let outcome = app_state
        .plan_use_cases
        .request_plan_change(user_id, payload.plan)
        .await?;

    Ok(Json(outcome))
}

/// GET /api/users/{user_id}/subscription
async fn subscription_snapshot(
    State(app_state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let snapshot = app_state
        .plan_use_cases
        .subscription_snapshot(user_id)
        .await?;

    Ok(Json(snapshot))
}

/// PUT /api/users/{user_id}/payment-methods/default
async fn set_default_payment_method(
    State(app_state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<DefaultPaymentMethodPayload>,
) -> AppResult<impl IntoResponse> {
    let outcome = app_state
        .payment_method_use_cases
        .set_default(user_id, &PaymentMethodId::new(payload.payment_method_id))
        .await?;

    Ok(Json(outcome))
}

/// DELETE /api/users/{user_id}/payment-methods/{payment_method_id}
async fn remove_payment_method(
    State(app_state): State<AppState>,
    Path((user_id, payment_method_id)): Path<(Uuid, String)>,
) -> AppResult<impl IntoResponse> {
    let removed = app_state
        .payment_method_use_cases
        .remove(user_id, &PaymentMethodId::new(payment_method_id))
        .await?;

    Ok(Json(removed))
}
