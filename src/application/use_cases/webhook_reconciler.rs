use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    app_error::AppResult,
    application::{
        helpers::recent_write_guard::RecentWriteGuard,
        ports::{
            billing_processor::{
                BillingProcessorPort, CreateSubscriptionRequest, CustomerInfo,
                USER_ID_METADATA_KEY, UpdateSubscriptionRequest,
            },
            profile_store::{LocalProfileStore, WebhookEventLog},
        },
    },
    domain::entities::{
        billing_event::{
            BillingEvent, BillingEventKind, ConfirmedSetupIntent, FailedInvoice, PaidInvoice,
        },
        billing_subscription::{BillingSubscription, CustomerId, find_active},
        entitlement::EntitlementUpdate,
        plan::{Plan, PlanPrices},
    },
};

/// What a delivery amounted to. Every variant is a successful delivery; only
/// `Err` asks the sender to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied,
    /// Already handled under the same event id.
    Duplicate,
    /// A fresher local write exists; the event was not folded in.
    RaceSuppressed,
    /// No local user owns the customer. The event is dropped.
    UnresolvedUser,
    /// The customer record is gone, so the user is being removed.
    CustomerGone,
    Ignored,
}

/// Folds processor notifications into local entitlement state.
pub struct WebhookReconciler {
    processor: Arc<dyn BillingProcessorPort>,
    store: Arc<dyn LocalProfileStore>,
    events: Arc<dyn WebhookEventLog>,
    guard: Arc<RecentWriteGuard>,
    prices: PlanPrices,
}

impl WebhookReconciler {
    pub fn new(
        processor: Arc<dyn BillingProcessorPort>,
        store: Arc<dyn LocalProfileStore>,
        events: Arc<dyn WebhookEventLog>,
        guard: Arc<RecentWriteGuard>,
        prices: PlanPrices,
    ) -> Self {
        Self {
            processor,
            store,
            events,
            guard,
            prices,
        }
    }

    /// Handles one delivery. The event id is recorded only after the handler
    /// finished, so a failed delivery is retried in full.
    pub async fn handle(&self, event: &BillingEvent) -> AppResult<ReconcileOutcome> {
        if self.events.is_processed(&event.id).await? {
            tracing::debug!(event_id = %event.id, "Duplicate webhook delivery");
            return Ok(ReconcileOutcome::Duplicate);
        }

        let outcome = match &event.kind {
            BillingEventKind::SubscriptionDeleted(sub) => self.subscription_deleted(sub).await?,
            BillingEventKind::SubscriptionUpdated(sub) => self.subscription_updated(sub).await?,
            BillingEventKind::InvoicePaymentSucceeded(invoice) => {
                self.invoice_paid(invoice).await?
            }
            BillingEventKind::InvoicePaymentFailed(invoice) => self.invoice_failed(invoice),
            BillingEventKind::SetupIntentSucceeded(intent) => {
                self.setup_intent_succeeded(intent).await?
            }
            BillingEventKind::Other(event_type) => {
                tracing::debug!(event_type, "Unhandled webhook event type");
                ReconcileOutcome::Ignored
            }
        };

        self.events
            .mark_processed(&event.id, event.event_type())
            .await?;

        tracing::info!(
            event_id = %event.id,
            event_type = event.event_type(),
            outcome = ?outcome,
            "Webhook reconciled"
        );
        Ok(outcome)
    }

    // ========================================================================
    // Event Handlers
    // ========================================================================

    async fn subscription_deleted(&self, sub: &BillingSubscription) -> AppResult<ReconcileOutcome> {
        if self
            .processor
            .retrieve_customer(&sub.customer_id)
            .await?
            .is_none()
        {
            tracing::info!(customer_id = %sub.customer_id, "Subscription deleted with its customer");
            return Ok(ReconcileOutcome::CustomerGone);
        }

        let Some(user_id) = self.resolve_user(&sub.customer_id).await? else {
            return Ok(self.unresolved(&sub.customer_id));
        };

        let remaining = self.processor.list_subscriptions(&sub.customer_id).await?;
        if let Some(other) = find_active(&remaining).filter(|other| other.id != sub.id) {
            if self.prices.is_premium_price(&other.price_id) {
                tracing::info!(
                    user_id = %user_id,
                    deleted = %sub.id,
                    active = %other.id,
                    "Customer still has an active premium subscription"
                );
                return Ok(ReconcileOutcome::Ignored);
            }

            // A starter subscription already exists, possibly from an earlier
            // attempt at this same event. Only the local reset is missing.
            tracing::info!(
                user_id = %user_id,
                deleted = %sub.id,
                active = %other.id,
                "Starter subscription already present, resetting local plan"
            );
            return self
                .write_guarded(user_id, sub, &EntitlementUpdate::starter_reset())
                .await;
        }

        // Every customer keeps exactly one subscription record.
        let starter = self
            .processor
            .create_subscription(&CreateSubscriptionRequest {
                customer_id: sub.customer_id.clone(),
                price_id: self.prices.starter_price_id.clone(),
                trial_end: None,
                require_payment_confirmation: false,
            })
            .await?;
        tracing::info!(
            user_id = %user_id,
            subscription_id = %starter.subscription.id,
            "Recreated starter subscription"
        );

        self.write_guarded(user_id, sub, &EntitlementUpdate::starter_reset())
            .await
    }

    async fn subscription_updated(&self, sub: &BillingSubscription) -> AppResult<ReconcileOutcome> {
        let Some(user_id) = self.resolve_user(&sub.customer_id).await? else {
            return Ok(self.unresolved(&sub.customer_id));
        };

        let update = EntitlementUpdate::from_subscription(sub, &self.prices);
        self.write_guarded(user_id, sub, &update).await
    }

    async fn invoice_paid(&self, invoice: &PaidInvoice) -> AppResult<ReconcileOutcome> {
        let Some(price_id) = invoice.price_id.as_deref() else {
            tracing::debug!(invoice_id = %invoice.invoice_id, "Paid invoice without line items");
            return Ok(ReconcileOutcome::Ignored);
        };

        let Some(user_id) = self.resolve_user(&invoice.customer_id).await? else {
            return Ok(self.unresolved(&invoice.customer_id));
        };

        let update = if self.prices.is_premium_price(price_id) {
            // A paid premium invoice means any trial has been spent.
            EntitlementUpdate {
                plan: Some(Plan::Premium),
                mark_trial_used: true,
                premium_end_at: invoice.period_end.map(Some),
                ..Default::default()
            }
        } else {
            EntitlementUpdate {
                plan: Some(Plan::Starter),
                ..Default::default()
            }
        };

        let mut keys = vec![invoice.customer_id.as_str()];
        if let Some(sub_id) = &invoice.subscription_id {
            keys.push(sub_id.as_str());
        }
        if let Some(key) = self.guard.fresh_key(keys) {
            return Ok(self.suppressed(user_id, key));
        }

        self.store.update(user_id, &update).await?;
        Ok(ReconcileOutcome::Applied)
    }

    fn invoice_failed(&self, invoice: &FailedInvoice) -> ReconcileOutcome {
        tracing::warn!(
            invoice_id = %invoice.invoice_id,
            customer_id = %invoice.customer_id,
            subscription_id = ?invoice.subscription_id,
            attempt_count = invoice.attempt_count,
            "Invoice payment failed"
        );
        ReconcileOutcome::Ignored
    }

    /// Asynchronous side of "a new card means the user continues".
    async fn setup_intent_succeeded(
        &self,
        intent: &ConfirmedSetupIntent,
    ) -> AppResult<ReconcileOutcome> {
        let Some(customer) = &intent.customer_id else {
            tracing::debug!(setup_intent = %intent.id, "Setup intent without customer");
            return Ok(ReconcileOutcome::Ignored);
        };

        let mut outcome = ReconcileOutcome::Ignored;

        if let Some(payment_method) = &intent.payment_method {
            self.processor
                .set_default_payment_method(customer, payment_method)
                .await?;
            outcome = ReconcileOutcome::Applied;
        }

        let Some(sub_id) = &intent.subscription_id else {
            return Ok(outcome);
        };
        let Some(sub) = self.processor.retrieve_subscription(sub_id).await? else {
            tracing::info!(subscription_id = %sub_id, "Setup intent references a missing subscription");
            return Ok(outcome);
        };

        if sub.customer_id != *customer {
            tracing::warn!(
                subscription_id = %sub.id,
                customer_id = %customer,
                "Setup intent subscription belongs to another customer"
            );
            return Ok(outcome);
        }
        if !(sub.cancel_at_period_end && sub.is_current()) {
            return Ok(outcome);
        }

        let mutation = self
            .processor
            .update_subscription(&sub.id, &UpdateSubscriptionRequest::cancel_at_period_end(false))
            .await?;
        tracing::info!(subscription_id = %sub.id, "Setup intent reactivated subscription");

        let Some(user_id) = self.resolve_user(customer).await? else {
            return Ok(self.unresolved(customer));
        };

        let update = EntitlementUpdate::from_subscription(&mutation.subscription, &self.prices);
        self.write_guarded(user_id, &mutation.subscription, &update)
            .await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn write_guarded(
        &self,
        user_id: Uuid,
        sub: &BillingSubscription,
        update: &EntitlementUpdate,
    ) -> AppResult<ReconcileOutcome> {
        if let Some(key) = self
            .guard
            .fresh_key([sub.id.as_str(), sub.customer_id.as_str()])
        {
            return Ok(self.suppressed(user_id, key));
        }

        self.store.update(user_id, update).await?;
        Ok(ReconcileOutcome::Applied)
    }

    /// Owning user of a customer: stored handle, then the customer's
    /// `user_id` metadata, then its email. A fallback hit repairs both sides.
    async fn resolve_user(&self, customer: &CustomerId) -> AppResult<Option<Uuid>> {
        if let Some(user_id) = self.store.find_user_by_customer(customer).await? {
            return Ok(Some(user_id));
        }

        let Some(info) = self.processor.retrieve_customer(customer).await? else {
            return Ok(None);
        };

        let mut found = None;
        if let Some(user_id) = info.user_id() {
            if self.store.get(user_id).await?.is_some() {
                found = Some(user_id);
            }
        }
        if found.is_none() {
            if let Some(email) = info.email.as_deref() {
                found = self.store.find_user_by_email(email).await?;
            }
        }

        if let Some(user_id) = found {
            self.repair_link(user_id, &info).await?;
        }
        Ok(found)
    }

    async fn repair_link(&self, user_id: Uuid, info: &CustomerInfo) -> AppResult<()> {
        self.store
            .set_customer_handle(user_id, Some(&info.customer_id))
            .await?;

        if info.user_id() != Some(user_id) {
            let metadata =
                HashMap::from([(USER_ID_METADATA_KEY.to_string(), user_id.to_string())]);
            self.processor
                .update_customer_metadata(&info.customer_id, &metadata)
                .await?;
        }

        tracing::info!(
            user_id = %user_id,
            customer_id = %info.customer_id,
            "Repaired customer link from webhook"
        );
        Ok(())
    }

    fn unresolved(&self, customer: &CustomerId) -> ReconcileOutcome {
        tracing::warn!(customer_id = %customer, "No local user for webhook customer, dropping event");
        ReconcileOutcome::UnresolvedUser
    }

    fn suppressed(&self, user_id: Uuid, key: &str) -> ReconcileOutcome {
        tracing::info!(
            user_id = %user_id,
            key,
            "Recent local write, skipping webhook state"
        );
        ReconcileOutcome::RaceSuppressed
    }
}
