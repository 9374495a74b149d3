use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    app_error::AppResult,
    domain::entities::{
        billing_subscription::CustomerId,
        entitlement::{BillingProfile, EntitlementUpdate},
    },
};

/// Persisted per-user billing profile: email, cached customer handle and the
/// local entitlement.
#[async_trait]
pub trait LocalProfileStore: Send + Sync {
    async fn get(&self, user_id: Uuid) -> AppResult<Option<BillingProfile>>;

    /// Applies a partial entitlement write. Never clears `trial_used`.
    async fn update(&self, user_id: Uuid, update: &EntitlementUpdate) -> AppResult<()>;

    async fn set_customer_handle(
        &self,
        user_id: Uuid,
        customer_id: Option<&CustomerId>,
    ) -> AppResult<()>;

    async fn find_user_by_customer(&self, customer_id: &CustomerId) -> AppResult<Option<Uuid>>;

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<Uuid>>;
}

/// Record of webhook deliveries that were fully handled.
#[async_trait]
pub trait WebhookEventLog: Send + Sync {
    async fn is_processed(&self, event_id: &str) -> AppResult<bool>;

    async fn mark_processed(&self, event_id: &str, event_type: &str) -> AppResult<()>;
}
