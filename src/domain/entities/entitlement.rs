use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{
    billing_subscription::{BillingSubscription, CustomerId},
    plan::{Plan, PlanPrices},
    subscription_status::SubscriptionStatus,
};

/// Locally persisted entitlement of a user. A derived cache of processor state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocalEntitlement {
    pub plan: Plan,
    /// Monotonic: once true, never false again.
    pub trial_used: bool,
    pub trial_started_at: Option<DateTime<Utc>>,
    pub trial_end_at: Option<DateTime<Utc>>,
    pub cancellation_pending: bool,
    pub premium_end_at: Option<DateTime<Utc>>,
}

/// The stored billing profile of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillingProfile {
    pub user_id: Uuid,
    pub email: String,
    /// Cached processor customer handle. May be stale.
    pub customer_handle: Option<CustomerId>,
    pub entitlement: LocalEntitlement,
}

/// Partial write to a [`LocalEntitlement`].
///
/// `trial_used` can only be set, never cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitlementUpdate {
    pub plan: Option<Plan>,
    pub mark_trial_used: bool,
    pub trial_started_at: Option<DateTime<Utc>>,
    pub trial_end_at: Option<Option<DateTime<Utc>>>,
    pub cancellation_pending: Option<bool>,
    pub premium_end_at: Option<Option<DateTime<Utc>>>,
}

impl EntitlementUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Back to starter: clears cancellation and every premium-only date.
    pub fn starter_reset() -> Self {
        Self {
            plan: Some(Plan::Starter),
            trial_end_at: Some(None),
            cancellation_pending: Some(false),
            premium_end_at: Some(None),
            ..Default::default()
        }
    }

    /// Premium with no pending end, as after a reactivation or a fresh grant.
    pub fn premium_continuing() -> Self {
        Self {
            plan: Some(Plan::Premium),
            cancellation_pending: Some(false),
            premium_end_at: Some(None),
            ..Default::default()
        }
    }

    /// Premium retained until `period_end`, then ends.
    pub fn pending_cancellation(period_end: DateTime<Utc>) -> Self {
        Self {
            cancellation_pending: Some(true),
            premium_end_at: Some(Some(period_end)),
            ..Default::default()
        }
    }

    /// Folds the processor's view of a subscription into local fields.
    ///
    /// Starter price or a non-entitling status resets to starter. Otherwise
    /// the user is premium; the trial flag and cancellation flag mirror the
    /// processor.
    pub fn from_subscription(sub: &BillingSubscription, prices: &PlanPrices) -> Self {
        if !prices.is_premium_price(&sub.price_id) || !sub.status.is_current() {
            return Self::starter_reset();
        }

        let trialing = sub.status == SubscriptionStatus::Trialing;
        Self {
            plan: Some(Plan::Premium),
            mark_trial_used: trialing,
            trial_started_at: None,
            trial_end_at: Some(sub.trial_end),
            cancellation_pending: Some(sub.cancel_at_period_end),
            premium_end_at: Some(sub.cancel_at_period_end.then_some(sub.current_period_end)),
        }
    }

    pub fn apply_to(&self, entitlement: &mut LocalEntitlement) {
        if let Some(plan) = self.plan {
            entitlement.plan = plan;
        }
        entitlement.trial_used = entitlement.trial_used || self.mark_trial_used;
        if let Some(started) = self.trial_started_at {
            entitlement.trial_started_at = Some(started);
        }
        if let Some(trial_end) = self.trial_end_at {
            entitlement.trial_end_at = trial_end;
        }
        if let Some(pending) = self.cancellation_pending {
            entitlement.cancellation_pending = pending;
        }
        if let Some(premium_end) = self.premium_end_at {
            entitlement.premium_end_at = premium_end;
        }
    }
}
