use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::{
    app_error::AppResult,
    domain::entities::billing_subscription::{
        BillingSubscription, CustomerId, PaymentMethodId, SubscriptionId,
    },
};

// ============================================================================
// Port Types - Provider-agnostic domain types
// ============================================================================

/// Customer metadata key carrying the local user id.
pub const USER_ID_METADATA_KEY: &str = "user_id";

/// Setup-intent metadata key carrying the subscription the card is meant for.
pub const SUBSCRIPTION_ID_METADATA_KEY: &str = "subscription_id";

/// Customer information
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerInfo {
    pub customer_id: CustomerId,
    pub email: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl CustomerInfo {
    /// The local user id recorded on the customer, if any and well-formed.
    pub fn user_id(&self) -> Option<Uuid> {
        self.metadata
            .get(USER_ID_METADATA_KEY)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub email: String,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentMethodInfo {
    pub id: PaymentMethodId,
    /// Owning customer. `None` once detached.
    pub customer_id: Option<CustomerId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSubscriptionRequest {
    pub customer_id: CustomerId,
    pub price_id: String,
    /// Absolute trial end; fractional-day trials need a timestamp.
    pub trial_end: Option<DateTime<Utc>>,
    /// Leave the subscription incomplete until the client confirms payment.
    pub require_payment_confirmation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceSwap {
    pub item_id: String,
    pub price_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSubscriptionRequest {
    pub swap_price: Option<PriceSwap>,
    pub cancel_at_period_end: Option<bool>,
    pub trial_end: Option<DateTime<Utc>>,
    /// Drop the subscription-level default so the customer default applies.
    pub clear_default_payment_method: bool,
    pub require_payment_confirmation: bool,
}

impl UpdateSubscriptionRequest {
    pub fn cancel_at_period_end(cancel: bool) -> Self {
        Self {
            cancel_at_period_end: Some(cancel),
            ..Default::default()
        }
    }
}

/// A subscription as returned from a create/update call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionMutation {
    pub subscription: BillingSubscription,
    /// Client secret of the initial invoice's payment, when one is due.
    pub payment_client_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupIntentInfo {
    pub id: String,
    pub client_secret: String,
}

// ============================================================================
// Billing Processor Port
// ============================================================================

/// The operations the reconciliation engine needs from the billing processor.
///
/// Lookups of customers, subscriptions and payment methods return `None` when
/// the processor reports the object as deleted or missing; a stale reference is
/// never an error. Every other failure surfaces as `AppError::Processor`.
#[async_trait]
pub trait BillingProcessorPort: Send + Sync {
    // ========================================================================
    // Customers
    // ========================================================================

    async fn retrieve_customer(&self, customer_id: &CustomerId) -> AppResult<Option<CustomerInfo>>;

    /// Customers with this email, in processor order.
    async fn find_customers_by_email(&self, email: &str) -> AppResult<Vec<CustomerInfo>>;

    async fn create_customer(
        &self,
        customer: &NewCustomer,
        idempotency_key: &str,
    ) -> AppResult<CustomerInfo>;

    async fn update_customer_metadata(
        &self,
        customer_id: &CustomerId,
        metadata: &HashMap<String, String>,
    ) -> AppResult<()>;

    /// Sets the customer's invoice default payment method.
    async fn set_default_payment_method(
        &self,
        customer_id: &CustomerId,
        payment_method_id: &PaymentMethodId,
    ) -> AppResult<()>;

    /// Deletes the customer. The processor cancels its subscriptions and
    /// detaches its payment methods.
    async fn delete_customer(&self, customer_id: &CustomerId) -> AppResult<()>;

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// All subscriptions of the customer, in processor order.
    async fn list_subscriptions(
        &self,
        customer_id: &CustomerId,
    ) -> AppResult<Vec<BillingSubscription>>;

    async fn retrieve_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<Option<BillingSubscription>>;

    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> AppResult<SubscriptionMutation>;

    async fn update_subscription(
        &self,
        subscription_id: &SubscriptionId,
        request: &UpdateSubscriptionRequest,
    ) -> AppResult<SubscriptionMutation>;

    // ========================================================================
    // Payment Methods
    // ========================================================================

    async fn list_payment_methods(
        &self,
        customer_id: &CustomerId,
    ) -> AppResult<Vec<PaymentMethodInfo>>;

    async fn retrieve_payment_method(
        &self,
        payment_method_id: &PaymentMethodId,
    ) -> AppResult<Option<PaymentMethodInfo>>;

    async fn create_setup_intent(
        &self,
        customer_id: &CustomerId,
        metadata: &HashMap<String, String>,
    ) -> AppResult<SetupIntentInfo>;
}
