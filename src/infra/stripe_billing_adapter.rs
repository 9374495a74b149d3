use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::collections::HashMap;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::billing_processor::{
        BillingProcessorPort, CreateSubscriptionRequest, CustomerInfo, NewCustomer,
        PaymentMethodInfo, SUBSCRIPTION_ID_METADATA_KEY, SetupIntentInfo, SubscriptionMutation,
        USER_ID_METADATA_KEY, UpdateSubscriptionRequest,
    },
    domain::entities::{
        billing_event::{
            BillingEvent, BillingEventKind, ConfirmedSetupIntent, FailedInvoice, PaidInvoice,
        },
        billing_subscription::{BillingSubscription, CustomerId, PaymentMethodId, SubscriptionId},
        subscription_status::SubscriptionStatus,
    },
    infra::stripe_client::{
        StripeClient, StripeCustomer, StripeInvoice, StripePaymentMethod, StripeSetupIntent,
        StripeSubscription, StripeWebhookEvent,
    },
};

/// Adapter that wraps StripeClient to implement BillingProcessorPort.
#[derive(Clone)]
pub struct StripeBillingAdapter {
    client: StripeClient,
}

impl StripeBillingAdapter {
    pub fn new(secret_key: SecretString) -> AppResult<Self> {
        Ok(Self {
            client: StripeClient::new(secret_key)?,
        })
    }

    pub fn from_client(client: StripeClient) -> Self {
        Self { client }
    }
}

/// `Ok(None)` for objects Stripe reports as missing.
fn found<T>(result: AppResult<T>) -> AppResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(AppError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

fn timestamp(ts: i64) -> AppResult<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| AppError::Processor(format!("Timestamp out of range: {}", ts)))
}

fn expand_invoice_payment(params: &mut Vec<(String, String)>) {
    params.push(("expand[]".into(), "latest_invoice.payment_intent".into()));
}

// ============================================================================
// Stripe -> Domain Conversion
// ============================================================================

fn to_customer_info(customer: StripeCustomer) -> CustomerInfo {
    CustomerInfo {
        customer_id: CustomerId::new(customer.id),
        email: customer.email,
        metadata: customer.metadata,
    }
}

fn to_payment_method(method: StripePaymentMethod) -> PaymentMethodInfo {
    PaymentMethodInfo {
        id: PaymentMethodId::new(method.id),
        customer_id: method.customer.map(CustomerId::new),
    }
}

pub fn to_subscription(sub: &StripeSubscription) -> AppResult<BillingSubscription> {
    let period_end = sub.period_end().ok_or_else(|| {
        AppError::Processor(format!("Subscription {} has no current period end", sub.id))
    })?;

    Ok(BillingSubscription {
        id: SubscriptionId::new(sub.id.clone()),
        customer_id: CustomerId::new(sub.customer.clone()),
        status: SubscriptionStatus::from_stripe(&sub.status),
        price_id: sub.price_id(),
        item_id: sub.first_item().map(|item| item.id.clone()),
        cancel_at_period_end: sub.cancel_at_period_end,
        current_period_end: timestamp(period_end)?,
        trial_end: sub.trial_end.map(timestamp).transpose()?,
    })
}

fn to_mutation(sub: StripeSubscription) -> AppResult<SubscriptionMutation> {
    Ok(SubscriptionMutation {
        subscription: to_subscription(&sub)?,
        payment_client_secret: sub.payment_client_secret(),
    })
}

fn to_paid_invoice(invoice: &StripeInvoice) -> AppResult<PaidInvoice> {
    let line = invoice.first_line();
    Ok(PaidInvoice {
        invoice_id: invoice.id.clone(),
        customer_id: CustomerId::new(invoice.customer.clone()),
        subscription_id: invoice.subscription_id().map(SubscriptionId::new),
        price_id: line.and_then(|l| l.price_id()),
        period_end: line
            .and_then(|l| l.period.as_ref())
            .map(|p| timestamp(p.end))
            .transpose()?,
        amount_paid: invoice.amount_paid,
    })
}

fn to_failed_invoice(invoice: &StripeInvoice) -> FailedInvoice {
    FailedInvoice {
        invoice_id: invoice.id.clone(),
        customer_id: CustomerId::new(invoice.customer.clone()),
        subscription_id: invoice.subscription_id().map(SubscriptionId::new),
        attempt_count: invoice.attempt_count,
    }
}

fn to_setup_intent(intent: &StripeSetupIntent) -> ConfirmedSetupIntent {
    ConfirmedSetupIntent {
        id: intent.id.clone(),
        customer_id: intent.customer.clone().map(CustomerId::new),
        payment_method: intent.payment_method.clone().map(PaymentMethodId::new),
        subscription_id: intent
            .metadata
            .get(SUBSCRIPTION_ID_METADATA_KEY)
            .map(SubscriptionId::new),
    }
}

/// Parses a verified webhook body into a domain event.
pub fn parse_billing_event(payload: &str) -> AppResult<BillingEvent> {
    let event: StripeWebhookEvent = serde_json::from_str(payload)
        .map_err(|e| AppError::InvalidInput(format!("Invalid webhook payload: {}", e)))?;

    // Conversion failures are permanent for a given payload.
    to_billing_event(&event).map_err(|e| match e {
        AppError::InvalidInput(msg) => AppError::InvalidInput(msg),
        other => AppError::InvalidInput(format!("Unusable {} payload: {}", event.event_type, other)),
    })
}

fn to_billing_event(event: &StripeWebhookEvent) -> AppResult<BillingEvent> {
    let kind = match event.event_type.as_str() {
        "customer.subscription.deleted" => {
            BillingEventKind::SubscriptionDeleted(to_subscription(&event.object()?)?)
        }
        "customer.subscription.updated" => {
            BillingEventKind::SubscriptionUpdated(to_subscription(&event.object()?)?)
        }
        "invoice.payment_succeeded" => {
            BillingEventKind::InvoicePaymentSucceeded(to_paid_invoice(&event.object()?)?)
        }
        "invoice.payment_failed" => {
            BillingEventKind::InvoicePaymentFailed(to_failed_invoice(&event.object()?))
        }
        "setup_intent.succeeded" => {
            BillingEventKind::SetupIntentSucceeded(to_setup_intent(&event.object()?))
        }
        other => BillingEventKind::Other(other.to_string()),
    };

    Ok(BillingEvent {
        created: timestamp(event.created)?,
        id: event.id.clone(),
        kind,
    })
}

#[async_trait]
impl BillingProcessorPort for StripeBillingAdapter {
    // ========================================================================
    // Customers
    // ========================================================================

    async fn retrieve_customer(&self, customer_id: &CustomerId) -> AppResult<Option<CustomerInfo>> {
        let customer = found(self.client.get_customer(customer_id.as_str()).await)?;
        Ok(customer
            .filter(|c| !c.deleted)
            .map(to_customer_info))
    }

    async fn find_customers_by_email(&self, email: &str) -> AppResult<Vec<CustomerInfo>> {
        let customers = self.client.list_customers_by_email(email).await?;
        Ok(customers
            .into_iter()
            .filter(|c| !c.deleted)
            .map(to_customer_info)
            .collect())
    }

    async fn create_customer(
        &self,
        customer: &NewCustomer,
        idempotency_key: &str,
    ) -> AppResult<CustomerInfo> {
        let metadata = HashMap::from([(
            USER_ID_METADATA_KEY.to_string(),
            customer.user_id.to_string(),
        )]);
        let created = self
            .client
            .create_customer(&customer.email, &metadata, idempotency_key)
            .await?;
        Ok(to_customer_info(created))
    }

    async fn update_customer_metadata(
        &self,
        customer_id: &CustomerId,
        metadata: &HashMap<String, String>,
    ) -> AppResult<()> {
        let params: Vec<(String, String)> = metadata
            .iter()
            .map(|(k, v)| (format!("metadata[{}]", k), v.clone()))
            .collect();
        self.client
            .update_customer(customer_id.as_str(), &params)
            .await?;
        Ok(())
    }

    async fn set_default_payment_method(
        &self,
        customer_id: &CustomerId,
        payment_method_id: &PaymentMethodId,
    ) -> AppResult<()> {
        let params = vec![(
            "invoice_settings[default_payment_method]".to_string(),
            payment_method_id.to_string(),
        )];
        self.client
            .update_customer(customer_id.as_str(), &params)
            .await?;
        Ok(())
    }

    async fn delete_customer(&self, customer_id: &CustomerId) -> AppResult<()> {
        // Already gone is as good as deleted.
        found(self.client.delete_customer(customer_id.as_str()).await)?;
        Ok(())
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    async fn list_subscriptions(
        &self,
        customer_id: &CustomerId,
    ) -> AppResult<Vec<BillingSubscription>> {
        self.client
            .list_subscriptions(customer_id.as_str())
            .await?
            .iter()
            .map(to_subscription)
            .collect()
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<Option<BillingSubscription>> {
        found(self.client.get_subscription(subscription_id.as_str()).await)?
            .map(|sub| to_subscription(&sub))
            .transpose()
    }

    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> AppResult<SubscriptionMutation> {
        let mut params = vec![
            ("customer".to_string(), request.customer_id.to_string()),
            ("items[0][price]".to_string(), request.price_id.clone()),
        ];
        if let Some(trial_end) = request.trial_end {
            params.push(("trial_end".into(), trial_end.timestamp().to_string()));
        }
        if request.require_payment_confirmation {
            params.push(("payment_behavior".into(), "default_incomplete".into()));
            params.push((
                "payment_settings[save_default_payment_method]".into(),
                "on_subscription".into(),
            ));
            expand_invoice_payment(&mut params);
        }

        to_mutation(self.client.create_subscription(&params).await?)
    }

    async fn update_subscription(
        &self,
        subscription_id: &SubscriptionId,
        request: &UpdateSubscriptionRequest,
    ) -> AppResult<SubscriptionMutation> {
        let mut params: Vec<(String, String)> = Vec::new();
        if let Some(swap) = &request.swap_price {
            params.push(("items[0][id]".into(), swap.item_id.clone()));
            params.push(("items[0][price]".into(), swap.price_id.clone()));
            params.push(("proration_behavior".into(), "always_invoice".into()));
        }
        if let Some(cancel) = request.cancel_at_period_end {
            params.push(("cancel_at_period_end".into(), cancel.to_string()));
        }
        if let Some(trial_end) = request.trial_end {
            params.push(("trial_end".into(), trial_end.timestamp().to_string()));
        }
        if request.clear_default_payment_method {
            params.push(("default_payment_method".into(), String::new()));
        }
        if request.require_payment_confirmation {
            params.push(("payment_behavior".into(), "default_incomplete".into()));
            expand_invoice_payment(&mut params);
        }

        to_mutation(
            self.client
                .update_subscription(subscription_id.as_str(), &params)
                .await?,
        )
    }

    // ========================================================================
    // Payment Methods
    // ========================================================================

    async fn list_payment_methods(
        &self,
        customer_id: &CustomerId,
    ) -> AppResult<Vec<PaymentMethodInfo>> {
        let methods = self.client.list_payment_methods(customer_id.as_str()).await?;
        Ok(methods.into_iter().map(to_payment_method).collect())
    }

    async fn retrieve_payment_method(
        &self,
        payment_method_id: &PaymentMethodId,
    ) -> AppResult<Option<PaymentMethodInfo>> {
        let method = found(
            self.client
                .get_payment_method(payment_method_id.as_str())
                .await,
        )?;
        Ok(method.map(to_payment_method))
    }

    async fn create_setup_intent(
        &self,
        customer_id: &CustomerId,
        metadata: &HashMap<String, String>,
    ) -> AppResult<SetupIntentInfo> {
        let intent = self
            .client
            .create_setup_intent(customer_id.as_str(), metadata)
            .await?;
        let client_secret = intent.client_secret.ok_or_else(|| {
            AppError::Processor(format!("Setup intent {} has no client secret", intent.id))
        })?;
        Ok(SetupIntentInfo {
            id: intent.id,
            client_secret,
        })
    }
}
