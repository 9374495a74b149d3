use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        helpers::recent_write_guard::RecentWriteGuard,
        ports::{
            billing_processor::{BillingProcessorPort, UpdateSubscriptionRequest},
            profile_store::LocalProfileStore,
        },
        use_cases::{
            customer_handle::{CustomerHandleResolver, ResolveMode},
            plan_transition::{PlanChangeOutcome, SubscriptionTransitionEngine},
        },
    },
    domain::entities::{
        billing_subscription::{CustomerId, PaymentMethodId, SubscriptionId, find_active},
        entitlement::{BillingProfile, EntitlementUpdate},
        plan::Plan,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefaultPaymentMethodOutcome {
    pub subscription_id: Option<SubscriptionId>,
    /// True when a pending cancellation was undone.
    pub reactivated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedPaymentMethod {
    pub downgrade: PlanChangeOutcome,
    pub customer_deleted: bool,
}

#[derive(Clone)]
pub struct PaymentMethodManager {
    processor: Arc<dyn BillingProcessorPort>,
    store: Arc<dyn LocalProfileStore>,
    resolver: CustomerHandleResolver,
    engine: SubscriptionTransitionEngine,
    guard: Arc<RecentWriteGuard>,
}

impl PaymentMethodManager {
    pub fn new(
        processor: Arc<dyn BillingProcessorPort>,
        store: Arc<dyn LocalProfileStore>,
        resolver: CustomerHandleResolver,
        engine: SubscriptionTransitionEngine,
        guard: Arc<RecentWriteGuard>,
    ) -> Self {
        Self {
            processor,
            store,
            resolver,
            engine,
            guard,
        }
    }

    /// Makes `payment_method_id` the customer's invoice default. The active
    /// subscription drops its own default so it inherits the customer's, and
    /// a pending cancellation is undone: a new card means the user continues.
    pub async fn set_default(
        &self,
        user_id: Uuid,
        payment_method_id: &PaymentMethodId,
    ) -> AppResult<DefaultPaymentMethodOutcome> {
        let (_, customer) = self.owned_payment_method(user_id, payment_method_id).await?;

        self.processor
            .set_default_payment_method(&customer, payment_method_id)
            .await?;

        let subscriptions = self.processor.list_subscriptions(&customer).await?;
        let Some(active) = find_active(&subscriptions) else {
            return Ok(DefaultPaymentMethodOutcome {
                subscription_id: None,
                reactivated: false,
            });
        };

        let reactivate = active.cancel_at_period_end;
        let mutation = self
            .processor
            .update_subscription(
                &active.id,
                &UpdateSubscriptionRequest {
                    clear_default_payment_method: true,
                    cancel_at_period_end: reactivate.then_some(false),
                    ..Default::default()
                },
            )
            .await?;

        if reactivate {
            let sub = &mutation.subscription;
            self.guard
                .mark_all([sub.id.as_str(), sub.customer_id.as_str()]);
            let update = if self.engine.prices().is_premium_price(&sub.price_id) {
                EntitlementUpdate::premium_continuing()
            } else {
                EntitlementUpdate {
                    cancellation_pending: Some(false),
                    premium_end_at: Some(None),
                    ..Default::default()
                }
            };
            self.store.update(user_id, &update).await?;
            tracing::info!(
                user_id = %user_id,
                subscription_id = %sub.id,
                "New default payment method reactivated subscription"
            );
        }

        Ok(DefaultPaymentMethodOutcome {
            subscription_id: Some(active.id.clone()),
            reactivated: reactivate,
        })
    }

    /// Schedules the downgrade first, then deletes the whole billing customer.
    /// Deleting the customer removes every card and ends remaining
    /// subscriptions processor-side; local access runs until the recorded
    /// period end.
    pub async fn remove(
        &self,
        user_id: Uuid,
        payment_method_id: &PaymentMethodId,
    ) -> AppResult<RemovedPaymentMethod> {
        let (profile, customer) = self.owned_payment_method(user_id, payment_method_id).await?;

        let downgrade = self
            .engine
            .apply_transition(&profile, &customer, Plan::Starter)
            .await?;

        // The deletion webhooks that follow must not reset local state.
        self.guard.mark(customer.as_str());
        self.processor.delete_customer(&customer).await?;
        self.store.set_customer_handle(user_id, None).await?;

        tracing::info!(
            user_id = %user_id,
            customer_id = %customer,
            downgrade = downgrade.status.as_str(),
            "Removed payment method by deleting billing customer"
        );

        Ok(RemovedPaymentMethod {
            downgrade,
            customer_deleted: true,
        })
    }

    async fn owned_payment_method(
        &self,
        user_id: Uuid,
        payment_method_id: &PaymentMethodId,
    ) -> AppResult<(BillingProfile, CustomerId)> {
        let profile = self.store.get(user_id).await?.ok_or(AppError::NotFound)?;
        let customer = self
            .resolver
            .resolve_for_profile(&profile, ResolveMode::LookupOnly)
            .await?
            .ok_or(AppError::NotFound)?;

        let method = self
            .processor
            .retrieve_payment_method(payment_method_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if method.customer_id.as_ref() != Some(&customer) {
            tracing::warn!(
                user_id = %user_id,
                payment_method_id = %payment_method_id,
                "Payment method belongs to another customer"
            );
            return Err(AppError::InvalidInput(
                "Payment method does not belong to this user".into(),
            ));
        }

        Ok((profile, customer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        application::use_cases::trial_policy::{TrialEligibilityPolicy, TrialLength},
        domain::entities::{
            subscription_state::TransitionStatus, subscription_status::SubscriptionStatus,
        },
        test_utils::{
            InMemoryBillingProcessor, InMemoryProfileStore, ManualClock, create_test_profile,
            test_prices,
        },
    };
    use chrono::Duration;

    struct Harness {
        processor: Arc<InMemoryBillingProcessor>,
        store: Arc<InMemoryProfileStore>,
        guard: Arc<RecentWriteGuard>,
        manager: PaymentMethodManager,
        user_id: Uuid,
        customer: CustomerId,
    }

    fn harness() -> Harness {
        let processor = Arc::new(InMemoryBillingProcessor::new());
        let store = Arc::new(InMemoryProfileStore::new());
        let clock = Arc::new(ManualClock::default());
        let guard = Arc::new(RecentWriteGuard::new(Duration::seconds(5), clock.clone()));
        let resolver = CustomerHandleResolver::new(processor.clone(), store.clone(), clock.clone());
        let engine = SubscriptionTransitionEngine::new(
            processor.clone(),
            store.clone(),
            resolver.clone(),
            TrialEligibilityPolicy::new(store.clone(), TrialLength::default()),
            guard.clone(),
            clock,
            test_prices(),
        );
        let manager = PaymentMethodManager::new(
            processor.clone(),
            store.clone(),
            resolver,
            engine,
            guard.clone(),
        );

        let customer = processor.add_customer("card@example.com", None);
        let profile = create_test_profile(|p| {
            p.email = "card@example.com".into();
            p.customer_handle = Some(customer.clone());
            p.entitlement.plan = Plan::Premium;
            p.entitlement.trial_used = true;
        });
        let user_id = profile.user_id;
        store.insert(profile);

        Harness {
            processor,
            store,
            guard,
            manager,
            user_id,
            customer,
        }
    }

    #[tokio::test]
    async fn test_set_default_reactivates_pending_cancellation() {
        let h = harness();
        let card = h.processor.add_payment_method(&h.customer);
        let sub = h
            .processor
            .add_subscription_with(&h.customer, "price_premium", |s| {
                s.cancel_at_period_end = true;
            });
        h.store.update_now(
            h.user_id,
            &EntitlementUpdate::pending_cancellation(chrono::Utc::now() + Duration::days(3)),
        );

        let outcome = h.manager.set_default(h.user_id, &card).await.unwrap();
        assert!(outcome.reactivated);
        assert_eq!(outcome.subscription_id, Some(sub.clone()));

        let ent = h.store.profile(h.user_id).unwrap().entitlement;
        assert!(!ent.cancellation_pending);
        assert!(ent.premium_end_at.is_none());
        assert_eq!(ent.plan, Plan::Premium);

        assert_eq!(h.processor.default_payment_method(&h.customer), Some(card));
        let (_, request) = h.processor.update_requests().pop().unwrap();
        assert!(request.clear_default_payment_method);
        assert_eq!(request.cancel_at_period_end, Some(false));
        assert!(!h.processor.subscription(&sub).unwrap().cancel_at_period_end);
        assert!(h.guard.is_fresh(sub.as_str()));
    }

    #[tokio::test]
    async fn test_set_default_without_pending_cancellation_writes_nothing_locally() {
        let h = harness();
        let card = h.processor.add_payment_method(&h.customer);
        h.processor
            .add_subscription(&h.customer, "price_premium", SubscriptionStatus::Active);

        let outcome = h.manager.set_default(h.user_id, &card).await.unwrap();
        assert!(!outcome.reactivated);
        assert!(h.store.updates_for(h.user_id).is_empty());
        let (_, request) = h.processor.update_requests().pop().unwrap();
        assert!(request.cancel_at_period_end.is_none());
    }

    #[tokio::test]
    async fn test_foreign_payment_method_is_rejected() {
        let h = harness();
        let stranger = h.processor.add_customer("other@example.com", None);
        let card = h.processor.add_payment_method(&stranger);

        let result = h.manager.set_default(h.user_id, &card).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert_eq!(h.processor.calls("set_default_payment_method"), 0);

        let missing = h
            .manager
            .set_default(h.user_id, &PaymentMethodId::new("pm_nope"))
            .await;
        assert!(matches!(missing, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn test_remove_only_card_of_premium_user() {
        let h = harness();
        let card = h.processor.add_payment_method(&h.customer);
        let sub = h
            .processor
            .add_subscription(&h.customer, "price_premium", SubscriptionStatus::Active);
        let period_end = h.processor.subscription(&sub).unwrap().current_period_end;

        let removed = h.manager.remove(h.user_id, &card).await.unwrap();
        assert_eq!(removed.downgrade.status, TransitionStatus::CanceledAtPeriodEnd);
        assert!(removed.customer_deleted);

        let profile = h.store.profile(h.user_id).unwrap();
        assert!(profile.entitlement.cancellation_pending);
        assert_eq!(profile.entitlement.premium_end_at, Some(period_end));
        assert!(profile.customer_handle.is_none());

        assert!(h.processor.is_customer_deleted(&h.customer));
        assert!(h.processor.customer_payment_methods(&h.customer).is_empty());

        // The cancel was scheduled before the customer went away.
        let update_idx = h.processor.call_index("update_subscription").unwrap();
        let delete_idx = h.processor.call_index("delete_customer").unwrap();
        assert!(update_idx < delete_idx);
    }

    #[tokio::test]
    async fn test_remove_aborts_when_downgrade_fails() {
        let h = harness();
        let card = h.processor.add_payment_method(&h.customer);
        h.processor
            .add_subscription(&h.customer, "price_premium", SubscriptionStatus::Active);
        h.processor.fail_on("update_subscription", "rate limited");

        let result = h.manager.remove(h.user_id, &card).await;
        assert!(matches!(result, Err(AppError::Processor(_))));
        assert!(!h.processor.is_customer_deleted(&h.customer));
        assert!(h.store.profile(h.user_id).unwrap().customer_handle.is_some());
    }
}
