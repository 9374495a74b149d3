use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    application::{
        ports::clock::Clock,
        use_cases::{
            payment_method::PaymentMethodManager, plan_transition::SubscriptionTransitionEngine,
            webhook_reconciler::WebhookReconciler,
        },
    },
    infra::config::AppConfig,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub plan_use_cases: Arc<SubscriptionTransitionEngine>,
    pub payment_method_use_cases: Arc<PaymentMethodManager>,
    pub webhook_reconciler: Arc<WebhookReconciler>,
    /// Time source for webhook signature tolerance checks.
    pub clock: Arc<dyn Clock>,
}

impl FromRef<AppState> for Arc<SubscriptionTransitionEngine> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.plan_use_cases.clone()
    }
}

impl FromRef<AppState> for Arc<PaymentMethodManager> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.payment_method_use_cases.clone()
    }
}
