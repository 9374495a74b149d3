use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        helpers::recent_write_guard::RecentWriteGuard,
        ports::{
            billing_processor::{
                BillingProcessorPort, CreateSubscriptionRequest, PriceSwap,
                SUBSCRIPTION_ID_METADATA_KEY, USER_ID_METADATA_KEY, UpdateSubscriptionRequest,
            },
            clock::Clock,
            profile_store::LocalProfileStore,
        },
        use_cases::{
            customer_handle::{CustomerHandleResolver, ResolveMode},
            trial_policy::{TrialEligibilityPolicy, TrialGrant},
        },
    },
    domain::entities::{
        billing_subscription::{
            BillingSubscription, CustomerId, SubscriptionId, count_current, find_active,
        },
        entitlement::{BillingProfile, EntitlementUpdate},
        plan::{Plan, PlanPrices},
        subscription_state::{SubscriptionState, TransitionAction, TransitionStatus, decide},
    },
};

// ============================================================================
// Result Types
// ============================================================================

/// Result of a plan change. A non-error return means the processor accepted
/// the mutation (or none was needed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanChangeOutcome {
    pub subscription_id: Option<SubscriptionId>,
    /// Secret the client uses to confirm a card, when one is needed.
    pub client_secret: Option<String>,
    pub status: TransitionStatus,
}

/// Live view of a user's subscription, read from the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionSnapshot {
    /// Processor status, or `"none"` without an active subscription.
    pub status: String,
    pub cancel_at_period_end: bool,
    pub current_period_end: Option<DateTime<Utc>>,
    pub plan: Plan,
}

// ============================================================================
// Engine
// ============================================================================

/// Decides and issues the single billing mutation a plan change needs.
///
/// Every call re-lists the customer's subscriptions before acting
/// (read-decide-act), so retries converge instead of stacking mutations.
/// Local state is written only after the processor accepted the call, and
/// each write is preceded by a recent-write marker for the webhook side.
#[derive(Clone)]
pub struct SubscriptionTransitionEngine {
    processor: Arc<dyn BillingProcessorPort>,
    store: Arc<dyn LocalProfileStore>,
    resolver: CustomerHandleResolver,
    trial_policy: TrialEligibilityPolicy,
    guard: Arc<RecentWriteGuard>,
    clock: Arc<dyn Clock>,
    prices: PlanPrices,
}

impl SubscriptionTransitionEngine {
    pub fn new(
        processor: Arc<dyn BillingProcessorPort>,
        store: Arc<dyn LocalProfileStore>,
        resolver: CustomerHandleResolver,
        trial_policy: TrialEligibilityPolicy,
        guard: Arc<RecentWriteGuard>,
        clock: Arc<dyn Clock>,
        prices: PlanPrices,
    ) -> Self {
        Self {
            processor,
            store,
            resolver,
            trial_policy,
            guard,
            clock,
            prices,
        }
    }

    pub fn prices(&self) -> &PlanPrices {
        &self.prices
    }

    pub async fn request_plan_change(
        &self,
        user_id: Uuid,
        desired: Plan,
    ) -> AppResult<PlanChangeOutcome> {
        let profile = self.load_profile(user_id).await?;

        let customer = self
            .resolver
            .resolve_for_profile(&profile, ResolveMode::CreateIfMissing)
            .await?
            .ok_or_else(|| AppError::Internal("Customer resolution returned nothing".into()))?;

        self.apply_transition(&profile, &customer, desired).await
    }

    /// Runs the state machine against the customer's current subscriptions.
    pub async fn apply_transition(
        &self,
        profile: &BillingProfile,
        customer: &CustomerId,
        desired: Plan,
    ) -> AppResult<PlanChangeOutcome> {
        let subscriptions = self.processor.list_subscriptions(customer).await?;
        self.warn_on_multiple_active(customer, &subscriptions);

        let state = SubscriptionState::classify(find_active(&subscriptions), &self.prices);
        let action = decide(state, desired);

        tracing::debug!(
            user_id = %profile.user_id,
            customer_id = %customer,
            desired = %desired,
            state = ?state,
            action = action.status().as_str(),
            "Plan transition decided"
        );

        match action {
            TransitionAction::CreatePremium => self.create_premium(profile, customer).await,
            TransitionAction::UpgradeInPlace(sub) => {
                self.upgrade_in_place(profile, customer, sub).await
            }
            TransitionAction::Reactivate(sub) => self.reactivate(profile.user_id, sub).await,
            TransitionAction::ScheduleCancel(sub) => {
                self.schedule_cancel(profile.user_id, sub).await
            }
            TransitionAction::NoOp {
                status,
                subscription,
            } => Ok(PlanChangeOutcome {
                subscription_id: subscription.map(|s| s.id.clone()),
                client_secret: None,
                status,
            }),
        }
    }

    /// Reads the live subscription and folds it back into local state unless
    /// a local write is still fresh.
    pub async fn subscription_snapshot(&self, user_id: Uuid) -> AppResult<SubscriptionSnapshot> {
        let profile = self.load_profile(user_id).await?;

        let customer = self
            .resolver
            .resolve_for_profile(&profile, ResolveMode::LookupOnly)
            .await?;

        let subscriptions = match &customer {
            Some(customer) => self.processor.list_subscriptions(customer).await?,
            None => Vec::new(),
        };

        let Some(active) = find_active(&subscriptions) else {
            return self.snapshot_without_subscription(&profile).await;
        };

        if let Some(key) = self
            .guard
            .fresh_key([active.id.as_str(), active.customer_id.as_str()])
        {
            tracing::debug!(user_id = %user_id, key, "Skipping snapshot self-correction");
        } else {
            let update = EntitlementUpdate::from_subscription(active, &self.prices);
            self.store.update(user_id, &update).await?;
        }

        Ok(SubscriptionSnapshot {
            status: active.status.as_str().to_string(),
            cancel_at_period_end: active.cancel_at_period_end,
            current_period_end: Some(active.current_period_end),
            plan: self.prices.plan_for_price(&active.price_id),
        })
    }

    // ========================================================================
    // Actions
    // ========================================================================

    async fn create_premium(
        &self,
        profile: &BillingProfile,
        customer: &CustomerId,
    ) -> AppResult<PlanChangeOutcome> {
        let trial = self
            .trial_policy
            .grant_for(&profile.entitlement, self.clock.now())?;
        if trial.is_none() {
            self.ensure_payment_method(profile.user_id, customer).await?;
        }

        let mutation = self
            .processor
            .create_subscription(&CreateSubscriptionRequest {
                customer_id: customer.clone(),
                price_id: self.prices.premium_price_id.clone(),
                trial_end: trial.map(|t| t.ends_at),
                require_payment_confirmation: true,
            })
            .await?;

        let sub = &mutation.subscription;
        self.record_local_write(sub);
        self.store
            .update(profile.user_id, &granted_update(sub, trial))
            .await?;

        tracing::info!(
            user_id = %profile.user_id,
            subscription_id = %sub.id,
            trial = trial.is_some(),
            status = %sub.status,
            "Created premium subscription"
        );

        let client_secret = self
            .payment_secret(profile.user_id, sub, trial, mutation.payment_client_secret.clone())
            .await?;

        Ok(PlanChangeOutcome {
            subscription_id: Some(sub.id.clone()),
            client_secret,
            status: TransitionStatus::Created,
        })
    }

    async fn upgrade_in_place(
        &self,
        profile: &BillingProfile,
        customer: &CustomerId,
        current: &BillingSubscription,
    ) -> AppResult<PlanChangeOutcome> {
        let item_id = current.item_id.clone().ok_or_else(|| {
            AppError::Internal(format!("Subscription {} has no line item", current.id))
        })?;

        let trial = self
            .trial_policy
            .grant_for(&profile.entitlement, self.clock.now())?;
        if trial.is_none() {
            self.ensure_payment_method(profile.user_id, customer).await?;
        }

        let mutation = self
            .processor
            .update_subscription(
                &current.id,
                &UpdateSubscriptionRequest {
                    swap_price: Some(PriceSwap {
                        item_id,
                        price_id: self.prices.premium_price_id.clone(),
                    }),
                    cancel_at_period_end: Some(false),
                    trial_end: trial.map(|t| t.ends_at),
                    clear_default_payment_method: false,
                    require_payment_confirmation: trial.is_none(),
                },
            )
            .await?;

        let sub = &mutation.subscription;
        self.record_local_write(sub);
        self.store
            .update(profile.user_id, &granted_update(sub, trial))
            .await?;

        tracing::info!(
            user_id = %profile.user_id,
            subscription_id = %sub.id,
            trial = trial.is_some(),
            "Upgraded subscription to premium in place"
        );

        let client_secret = self
            .payment_secret(profile.user_id, sub, trial, mutation.payment_client_secret.clone())
            .await?;

        Ok(PlanChangeOutcome {
            subscription_id: Some(sub.id.clone()),
            client_secret,
            status: TransitionStatus::Updated,
        })
    }

    async fn reactivate(
        &self,
        user_id: Uuid,
        current: &BillingSubscription,
    ) -> AppResult<PlanChangeOutcome> {
        let mutation = self
            .processor
            .update_subscription(&current.id, &UpdateSubscriptionRequest::cancel_at_period_end(false))
            .await?;

        self.record_local_write(&mutation.subscription);
        self.store
            .update(user_id, &EntitlementUpdate::premium_continuing())
            .await?;

        tracing::info!(user_id = %user_id, subscription_id = %current.id, "Reactivated subscription");

        Ok(PlanChangeOutcome {
            subscription_id: Some(current.id.clone()),
            client_secret: None,
            status: TransitionStatus::Reactivated,
        })
    }

    /// Downgrade keeps access through the paid period: the subscription ends
    /// at period end and the local end date is that period's end.
    async fn schedule_cancel(
        &self,
        user_id: Uuid,
        current: &BillingSubscription,
    ) -> AppResult<PlanChangeOutcome> {
        let mutation = self
            .processor
            .update_subscription(&current.id, &UpdateSubscriptionRequest::cancel_at_period_end(true))
            .await?;

        let sub = &mutation.subscription;
        self.record_local_write(sub);
        self.store
            .update(
                user_id,
                &EntitlementUpdate::pending_cancellation(sub.current_period_end),
            )
            .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %sub.id,
            period_end = %sub.current_period_end,
            "Scheduled cancellation at period end"
        );

        Ok(PlanChangeOutcome {
            subscription_id: Some(sub.id.clone()),
            client_secret: None,
            status: TransitionStatus::CanceledAtPeriodEnd,
        })
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn load_profile(&self, user_id: Uuid) -> AppResult<BillingProfile> {
        self.store.get(user_id).await?.ok_or(AppError::NotFound)
    }

    async fn ensure_payment_method(&self, user_id: Uuid, customer: &CustomerId) -> AppResult<()> {
        let methods = self.processor.list_payment_methods(customer).await?;
        if methods.is_empty() {
            tracing::warn!(
                user_id = %user_id,
                customer_id = %customer,
                "Immediate premium activation without a payment method"
            );
            return Err(AppError::NoPaymentMethod);
        }
        Ok(())
    }

    /// A trial collects a card for later through a setup intent; an immediate
    /// charge is confirmed through the initial invoice's payment.
    async fn payment_secret(
        &self,
        user_id: Uuid,
        sub: &BillingSubscription,
        trial: Option<TrialGrant>,
        invoice_secret: Option<String>,
    ) -> AppResult<Option<String>> {
        if trial.is_none() {
            return Ok(invoice_secret);
        }

        let metadata = HashMap::from([
            (SUBSCRIPTION_ID_METADATA_KEY.to_string(), sub.id.to_string()),
            (USER_ID_METADATA_KEY.to_string(), user_id.to_string()),
        ]);
        let intent = self
            .processor
            .create_setup_intent(&sub.customer_id, &metadata)
            .await?;
        Ok(Some(intent.client_secret))
    }

    fn record_local_write(&self, sub: &BillingSubscription) {
        self.guard
            .mark_all([sub.id.as_str(), sub.customer_id.as_str()]);
    }

    async fn snapshot_without_subscription(
        &self,
        profile: &BillingProfile,
    ) -> AppResult<SubscriptionSnapshot> {
        let entitlement = &profile.entitlement;
        let access_open = entitlement
            .premium_end_at
            .is_some_and(|end| end > self.clock.now());

        // Premium with nothing behind it and no paid window left is stale.
        if entitlement.plan.is_premium() && !access_open {
            let fresh = profile
                .customer_handle
                .as_ref()
                .is_some_and(|c| self.guard.is_fresh(c.as_str()));
            if !fresh {
                self.store
                    .update(profile.user_id, &EntitlementUpdate::starter_reset())
                    .await?;
            }
        }

        Ok(SubscriptionSnapshot {
            status: "none".to_string(),
            cancel_at_period_end: entitlement.cancellation_pending && access_open,
            current_period_end: entitlement.premium_end_at.filter(|_| access_open),
            plan: if entitlement.plan.is_premium() && access_open {
                Plan::Premium
            } else {
                Plan::Starter
            },
        })
    }

    fn warn_on_multiple_active(&self, customer: &CustomerId, subscriptions: &[BillingSubscription]) {
        let current = count_current(subscriptions);
        if current > 1 {
            tracing::warn!(
                customer_id = %customer,
                active_count = current,
                "Customer has several active subscriptions, using the first in processor order"
            );
        }
    }
}

/// Local fields after a subscription was created or moved onto premium.
fn granted_update(sub: &BillingSubscription, trial: Option<TrialGrant>) -> EntitlementUpdate {
    let mut update = EntitlementUpdate {
        cancellation_pending: Some(false),
        premium_end_at: Some(None),
        ..Default::default()
    };

    // An incomplete subscription waits for payment; the webhook grants premium.
    if sub.status.is_current() {
        update.plan = Some(Plan::Premium);
    }

    if let Some(trial) = trial {
        update.mark_trial_used = true;
        update.trial_started_at = Some(trial.starts_at);
        update.trial_end_at = Some(Some(sub.trial_end.unwrap_or(trial.ends_at)));
    }

    update
}
