//! Test data factories for creating valid test fixtures.
//!
//! Each factory function creates a complete, valid object with sensible defaults.
//! Use the closure parameter to override specific fields as needed.

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::domain::entities::{
    billing_event::{BillingEvent, BillingEventKind},
    billing_subscription::{BillingSubscription, CustomerId, SubscriptionId},
    entitlement::{BillingProfile, LocalEntitlement},
    plan::PlanPrices,
    subscription_status::SubscriptionStatus,
};

pub const TEST_STARTER_PRICE: &str = "price_starter";
pub const TEST_PREMIUM_PRICE: &str = "price_premium";

pub fn test_prices() -> PlanPrices {
    PlanPrices::new(TEST_STARTER_PRICE, TEST_PREMIUM_PRICE)
}

/// Create a starter user with no customer handle and an unused trial.
pub fn create_test_profile(overrides: impl FnOnce(&mut BillingProfile)) -> BillingProfile {
    let user_id = Uuid::new_v4();
    let mut profile = BillingProfile {
        user_id,
        email: format!("user-{}@example.com", user_id.simple()),
        customer_handle: None,
        entitlement: LocalEntitlement::default(),
    };
    overrides(&mut profile);
    profile
}

/// Create an active monthly subscription on `price_id`.
pub fn create_test_subscription(
    customer_id: &CustomerId,
    price_id: &str,
    overrides: impl FnOnce(&mut BillingSubscription),
) -> BillingSubscription {
    let suffix = Uuid::new_v4().simple().to_string();
    let mut subscription = BillingSubscription {
        id: SubscriptionId::new(format!("sub_{suffix}")),
        customer_id: customer_id.clone(),
        status: SubscriptionStatus::Active,
        price_id: price_id.to_string(),
        item_id: Some(format!("si_{suffix}")),
        cancel_at_period_end: false,
        current_period_end: Utc::now() + Duration::days(30),
        trial_end: None,
    };
    overrides(&mut subscription);
    subscription
}

/// Wrap an event payload with a fresh event id.
pub fn create_test_event(kind: BillingEventKind) -> BillingEvent {
    BillingEvent {
        id: format!("evt_{}", Uuid::new_v4().simple()),
        created: Utc::now(),
        kind,
    }
}
