use chrono::{DateTime, Utc};

use super::billing_subscription::{BillingSubscription, CustomerId, PaymentMethodId, SubscriptionId};

/// A webhook notification, already signature-checked and parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingEvent {
    pub id: String,
    pub created: DateTime<Utc>,
    pub kind: BillingEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEventKind {
    SubscriptionDeleted(BillingSubscription),
    SubscriptionUpdated(BillingSubscription),
    InvoicePaymentSucceeded(PaidInvoice),
    InvoicePaymentFailed(FailedInvoice),
    SetupIntentSucceeded(ConfirmedSetupIntent),
    /// Any event type the reconciler does not act on.
    Other(String),
}

impl BillingEvent {
    pub fn event_type(&self) -> &str {
        match &self.kind {
            BillingEventKind::SubscriptionDeleted(_) => "customer.subscription.deleted",
            BillingEventKind::SubscriptionUpdated(_) => "customer.subscription.updated",
            BillingEventKind::InvoicePaymentSucceeded(_) => "invoice.payment_succeeded",
            BillingEventKind::InvoicePaymentFailed(_) => "invoice.payment_failed",
            BillingEventKind::SetupIntentSucceeded(_) => "setup_intent.succeeded",
            BillingEventKind::Other(event_type) => event_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaidInvoice {
    pub invoice_id: String,
    pub customer_id: CustomerId,
    pub subscription_id: Option<SubscriptionId>,
    /// Price of the first line item.
    pub price_id: Option<String>,
    /// End of the period the first line item pays for.
    pub period_end: Option<DateTime<Utc>>,
    pub amount_paid: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedInvoice {
    pub invoice_id: String,
    pub customer_id: CustomerId,
    pub subscription_id: Option<SubscriptionId>,
    pub attempt_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedSetupIntent {
    pub id: String,
    pub customer_id: Option<CustomerId>,
    pub payment_method: Option<PaymentMethodId>,
    /// Subscription referenced by the intent's metadata, if any.
    pub subscription_id: Option<SubscriptionId>,
}
