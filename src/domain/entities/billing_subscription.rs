use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::subscription_status::SubscriptionStatus;

macro_rules! processor_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

processor_id!(
    /// Opaque handle of a customer record at the billing processor.
    CustomerId
);
processor_id!(
    /// Identifier of a subscription at the billing processor.
    SubscriptionId
);
processor_id!(
    /// Identifier of a stored payment instrument.
    PaymentMethodId
);

/// A subscription as the billing processor last reported it.
///
/// The processor owns this record. Local code only reads it and asks for
/// mutations; the result is confirmed again through the next webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillingSubscription {
    pub id: SubscriptionId,
    pub customer_id: CustomerId,
    pub status: SubscriptionStatus,
    /// Price of the first line item.
    pub price_id: String,
    /// Line item carrying `price_id`, needed to swap prices in place.
    pub item_id: Option<String>,
    pub cancel_at_period_end: bool,
    pub current_period_end: DateTime<Utc>,
    pub trial_end: Option<DateTime<Utc>>,
}

impl BillingSubscription {
    pub fn is_current(&self) -> bool {
        self.status.is_current()
    }
}

/// Picks "the active subscription" of a customer: the first one in processor
/// list order whose status is active, trialing or past-due.
///
/// List order is whatever the processor returns (most recent first in
/// practice). A customer with several current subscriptions is a data
/// hygiene problem; callers log it.
pub fn find_active(subscriptions: &[BillingSubscription]) -> Option<&BillingSubscription> {
    subscriptions.iter().find(|s| s.is_current())
}

/// Number of subscriptions that would qualify as active.
pub fn count_current(subscriptions: &[BillingSubscription]) -> usize {
    subscriptions.iter().filter(|s| s.is_current()).count()
}
