//! Pure plan-transition state machine.
//!
//! [`SubscriptionState::classify`] turns the customer's active subscription
//! into a tagged state and [`decide`] maps (state, desired plan) to exactly one
//! billing action. Neither touches the network, so every branch is unit-tested
//! here; the engine in `use_cases::plan_transition` only executes the action.

use serde::{Deserialize, Serialize};

use super::{
    billing_subscription::BillingSubscription,
    plan::{Plan, PlanPrices},
    subscription_status::SubscriptionStatus,
};

/// Where the customer stands relative to the premium price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState<'a> {
    NoSubscription,
    /// Premium price, active or past-due, renewing.
    ActiveSamePlan(&'a BillingSubscription),
    /// Any other price (starter or legacy).
    ActiveDifferentPlan(&'a BillingSubscription),
    /// Premium price, scheduled to end at period end.
    PendingCancellation(&'a BillingSubscription),
    /// Premium price, in trial, renewing.
    Trialing(&'a BillingSubscription),
}

impl<'a> SubscriptionState<'a> {
    pub fn classify(active: Option<&'a BillingSubscription>, prices: &PlanPrices) -> Self {
        let Some(sub) = active else {
            return SubscriptionState::NoSubscription;
        };

        if !prices.is_premium_price(&sub.price_id) {
            return SubscriptionState::ActiveDifferentPlan(sub);
        }

        if sub.cancel_at_period_end {
            SubscriptionState::PendingCancellation(sub)
        } else if sub.status == SubscriptionStatus::Trialing {
            SubscriptionState::Trialing(sub)
        } else {
            SubscriptionState::ActiveSamePlan(sub)
        }
    }

    pub fn subscription(&self) -> Option<&'a BillingSubscription> {
        match *self {
            SubscriptionState::NoSubscription => None,
            SubscriptionState::ActiveSamePlan(s)
            | SubscriptionState::ActiveDifferentPlan(s)
            | SubscriptionState::PendingCancellation(s)
            | SubscriptionState::Trialing(s) => Some(s),
        }
    }
}

/// Outcome reported to the caller of a plan change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionStatus {
    Created,
    Updated,
    Reactivated,
    AlreadyPremium,
    CanceledAtPeriodEnd,
    AlreadyStarter,
}

impl TransitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionStatus::Created => "created",
            TransitionStatus::Updated => "updated",
            TransitionStatus::Reactivated => "reactivated",
            TransitionStatus::AlreadyPremium => "already_premium",
            TransitionStatus::CanceledAtPeriodEnd => "canceled_at_period_end",
            TransitionStatus::AlreadyStarter => "already_starter",
        }
    }
}

/// The single billing mutation to issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionAction<'a> {
    CreatePremium,
    UpgradeInPlace(&'a BillingSubscription),
    Reactivate(&'a BillingSubscription),
    ScheduleCancel(&'a BillingSubscription),
    NoOp {
        status: TransitionStatus,
        subscription: Option<&'a BillingSubscription>,
    },
}

impl TransitionAction<'_> {
    /// Status reported once the action has been accepted by the processor.
    pub fn status(&self) -> TransitionStatus {
        match self {
            TransitionAction::CreatePremium => TransitionStatus::Created,
            TransitionAction::UpgradeInPlace(_) => TransitionStatus::Updated,
            TransitionAction::Reactivate(_) => TransitionStatus::Reactivated,
            TransitionAction::ScheduleCancel(_) => TransitionStatus::CanceledAtPeriodEnd,
            TransitionAction::NoOp { status, .. } => *status,
        }
    }
}

pub fn decide<'a>(state: SubscriptionState<'a>, desired: Plan) -> TransitionAction<'a> {
    match (desired, state) {
        (Plan::Premium, SubscriptionState::NoSubscription) => TransitionAction::CreatePremium,
        (Plan::Premium, SubscriptionState::ActiveDifferentPlan(sub)) => {
            TransitionAction::UpgradeInPlace(sub)
        }
        (Plan::Premium, SubscriptionState::PendingCancellation(sub)) => {
            TransitionAction::Reactivate(sub)
        }
        (Plan::Premium, SubscriptionState::ActiveSamePlan(sub))
        | (Plan::Premium, SubscriptionState::Trialing(sub)) => TransitionAction::NoOp {
            status: TransitionStatus::AlreadyPremium,
            subscription: Some(sub),
        },

        // Re-issuing schedule-cancel on a pending cancellation is idempotent
        // at the processor and refreshes the local end date.
        (Plan::Starter, SubscriptionState::ActiveSamePlan(sub))
        | (Plan::Starter, SubscriptionState::Trialing(sub))
        | (Plan::Starter, SubscriptionState::PendingCancellation(sub)) => {
            TransitionAction::ScheduleCancel(sub)
        }
        (Plan::Starter, SubscriptionState::ActiveDifferentPlan(sub)) => TransitionAction::NoOp {
            status: TransitionStatus::AlreadyStarter,
            subscription: Some(sub),
        },
        (Plan::Starter, SubscriptionState::NoSubscription) => TransitionAction::NoOp {
            status: TransitionStatus::AlreadyStarter,
            subscription: None,
        },
    }
}
