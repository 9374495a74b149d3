use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;

use crate::{
    app_error::{AppError, AppResult},
    infra::http_client::try_build_client,
};

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Upper bound for list calls; a customer never has more than a handful.
const LIST_LIMIT: &str = "100";

type Params = Vec<(String, String)>;

fn param(key: impl Into<String>, value: impl Into<String>) -> (String, String) {
    (key.into(), value.into())
}

/// Thin form-encoded client for the Stripe REST API.
///
/// Missing objects come back as `AppError::NotFound`; every other failure is
/// `AppError::Processor`.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: SecretString,
    base_url: String,
}

impl StripeClient {
    pub fn new(secret_key: SecretString) -> AppResult<Self> {
        Self::with_base_url(secret_key, STRIPE_API_BASE)
    }

    pub fn with_base_url(secret_key: SecretString, base_url: &str) -> AppResult<Self> {
        let client = try_build_client()
            .map_err(|e| AppError::Internal(format!("HTTP client init failed: {}", e)))?;
        Ok(Self {
            client,
            secret_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn auth_header(&self) -> String {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:", self.secret_key.expose_secret()));
        format!("Basic {}", encoded)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header("Authorization", self.auth_header())
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header("Authorization", self.auth_header())
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        self.client
            .delete(format!("{}{}", self.base_url, path))
            .header("Authorization", self.auth_header())
    }

    // ========================================================================
    // Customers
    // ========================================================================

    pub async fn get_customer(&self, customer_id: &str) -> AppResult<StripeCustomer> {
        self.send(self.get(&format!("/customers/{}", customer_id)))
            .await
    }

    pub async fn list_customers_by_email(&self, email: &str) -> AppResult<Vec<StripeCustomer>> {
        let list: StripeList<StripeCustomer> = self
            .send(
                self.get("/customers")
                    .query(&[("email", email), ("limit", LIST_LIMIT)]),
            )
            .await?;
        Ok(list.data)
    }

    pub async fn create_customer(
        &self,
        email: &str,
        metadata: &HashMap<String, String>,
        idempotency_key: &str,
    ) -> AppResult<StripeCustomer> {
        let mut params: Params = vec![param("email", email)];
        push_metadata(&mut params, "metadata", metadata);

        self.send(
            self.post("/customers")
                .header("Idempotency-Key", idempotency_key)
                .form(&params),
        )
        .await
    }

    pub async fn update_customer(&self, customer_id: &str, params: &Params) -> AppResult<StripeCustomer> {
        self.send(self.post(&format!("/customers/{}", customer_id)).form(params))
            .await
    }

    pub async fn delete_customer(&self, customer_id: &str) -> AppResult<StripeDeleted> {
        self.send(self.delete(&format!("/customers/{}", customer_id)))
            .await
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub async fn list_subscriptions(&self, customer_id: &str) -> AppResult<Vec<StripeSubscription>> {
        let list: StripeList<StripeSubscription> = self
            .send(self.get("/subscriptions").query(&[
                ("customer", customer_id),
                ("status", "all"),
                ("limit", LIST_LIMIT),
            ]))
            .await?;
        Ok(list.data)
    }

    pub async fn get_subscription(&self, subscription_id: &str) -> AppResult<StripeSubscription> {
        self.send(self.get(&format!("/subscriptions/{}", subscription_id)))
            .await
    }

    pub async fn create_subscription(&self, params: &Params) -> AppResult<StripeSubscription> {
        self.send(self.post("/subscriptions").form(params)).await
    }

    pub async fn update_subscription(
        &self,
        subscription_id: &str,
        params: &Params,
    ) -> AppResult<StripeSubscription> {
        self.send(
            self.post(&format!("/subscriptions/{}", subscription_id))
                .form(params),
        )
        .await
    }

    // ========================================================================
    // Payment Methods & Setup Intents
    // ========================================================================

    pub async fn list_payment_methods(&self, customer_id: &str) -> AppResult<Vec<StripePaymentMethod>> {
        let list: StripeList<StripePaymentMethod> = self
            .send(
                self.get(&format!("/customers/{}/payment_methods", customer_id))
                    .query(&[("limit", LIST_LIMIT)]),
            )
            .await?;
        Ok(list.data)
    }

    pub async fn get_payment_method(&self, payment_method_id: &str) -> AppResult<StripePaymentMethod> {
        self.send(self.get(&format!("/payment_methods/{}", payment_method_id)))
            .await
    }

    pub async fn create_setup_intent(
        &self,
        customer_id: &str,
        metadata: &HashMap<String, String>,
    ) -> AppResult<StripeSetupIntent> {
        let mut params: Params = vec![
            param("customer", customer_id),
            param("usage", "off_session"),
            param("payment_method_types[]", "card"),
        ];
        push_metadata(&mut params, "metadata", metadata);

        self.send(self.post("/setup_intents").form(&params)).await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn send<T: for<'de> Deserialize<'de>>(&self, request: RequestBuilder) -> AppResult<T> {
        let response = request
            .send()
            .await
            .map_err(|e| AppError::Processor(format!("Stripe request failed: {}", e)))?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> AppResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Processor(format!("Failed to read Stripe response: {}", e)))?;

        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse Stripe response");
            AppError::Processor(format!("Failed to parse Stripe response: {}", e))
        })
    }
}

fn push_metadata(params: &mut Params, prefix: &str, metadata: &HashMap<String, String>) {
    for (key, value) in metadata {
        params.push(param(format!("{}[{}]", prefix, key), value.clone()));
    }
}

/// Maps a failed Stripe response to an application error. Classification goes
/// by the error `code` and message, not by HTTP status alone.
pub fn classify_error(status: u16, body: &str) -> AppError {
    match serde_json::from_str::<StripeErrorResponse>(body) {
        Ok(response) if response.error.is_resource_missing() => {
            tracing::debug!(status, message = ?response.error.message, "Stripe object missing");
            AppError::NotFound
        }
        Ok(response) => {
            tracing::error!(
                status,
                error_type = %response.error.error_type,
                code = ?response.error.code,
                "Stripe API error"
            );
            AppError::Processor(format!(
                "Stripe error: {}",
                response
                    .error
                    .message
                    .unwrap_or(response.error.error_type)
            ))
        }
        Err(_) => {
            tracing::error!(status, "Unparsable Stripe error response");
            AppError::Processor(format!("Stripe API error: {}", status))
        }
    }
}

// ============================================================================
// Webhook Signature Verification
// ============================================================================

/// Checks a `Stripe-Signature` header (`t=...,v1=...`) against the raw body.
/// A valid signature older than `tolerance_secs` is rejected.
pub fn verify_webhook_signature(
    payload: &str,
    signature_header: &str,
    webhook_secret: &str,
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| AppError::InvalidInput("Missing timestamp in signature".into()))?;
    if signatures.is_empty() {
        return Err(AppError::InvalidInput("Missing signature".into()));
    }

    let matched = signatures.iter().any(|candidate| {
        let Ok(candidate) = hex::decode(candidate) else {
            return false;
        };
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(webhook_secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        mac.verify_slice(&candidate).is_ok()
    });
    if !matched {
        return Err(AppError::InvalidInput("Invalid signature".into()));
    }

    let signed_at: i64 = timestamp
        .parse()
        .map_err(|_| AppError::InvalidInput("Invalid timestamp".into()))?;
    if (now.timestamp() - signed_at).abs() > tolerance_secs {
        return Err(AppError::InvalidInput("Timestamp outside tolerance".into()));
    }

    Ok(())
}

// ============================================================================
// Stripe Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StripeList<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Set on the stub Stripe returns for a deleted customer.
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct StripeDeleted {
    pub id: String,
    pub deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// Absent on newer API versions, which report it per item.
    pub current_period_end: Option<i64>,
    pub trial_end: Option<i64>,
    pub items: StripeList<StripeSubscriptionItem>,
    /// Only present when expanded.
    pub latest_invoice: Option<serde_json::Value>,
}

impl StripeSubscription {
    pub fn first_item(&self) -> Option<&StripeSubscriptionItem> {
        self.items.data.first()
    }

    pub fn price_id(&self) -> String {
        self.first_item()
            .map(|item| item.price.id.clone())
            .unwrap_or_default()
    }

    pub fn period_end(&self) -> Option<i64> {
        self.current_period_end
            .or_else(|| self.first_item().and_then(|item| item.current_period_end))
    }

    /// Client secret of the expanded initial invoice's payment, if one is due.
    pub fn payment_client_secret(&self) -> Option<String> {
        let invoice = self.latest_invoice.as_ref()?;
        invoice
            .pointer("/payment_intent/client_secret")
            .or_else(|| invoice.pointer("/confirmation_secret/client_secret"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscriptionItem {
    pub id: String,
    pub price: StripePriceRef,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StripePriceRef {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct StripePaymentMethod {
    pub id: String,
    pub customer: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeSetupIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub customer: Option<String>,
    pub payment_method: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    pub customer: String,
    pub subscription: Option<String>,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub attempt_count: i64,
    pub lines: Option<StripeList<StripeInvoiceLine>>,
    /// Newer API versions move the subscription here.
    pub parent: Option<serde_json::Value>,
}

impl StripeInvoice {
    pub fn first_line(&self) -> Option<&StripeInvoiceLine> {
        self.lines.as_ref().and_then(|lines| lines.data.first())
    }

    pub fn subscription_id(&self) -> Option<String> {
        self.subscription.clone().or_else(|| {
            self.parent
                .as_ref()?
                .pointer("/subscription_details/subscription")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeInvoiceLine {
    pub price: Option<StripePriceRef>,
    pub pricing: Option<serde_json::Value>,
    pub period: Option<StripePeriod>,
}

impl StripeInvoiceLine {
    pub fn price_id(&self) -> Option<String> {
        self.price.as_ref().map(|p| p.id.clone()).or_else(|| {
            self.pricing
                .as_ref()?
                .pointer("/price_details/price")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct StripePeriod {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Deserialize)]
pub struct StripeErrorResponse {
    pub error: StripeError,
}

#[derive(Debug, Deserialize)]
pub struct StripeError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: Option<String>,
    pub code: Option<String>,
}

impl StripeError {
    pub fn is_resource_missing(&self) -> bool {
        self.code.as_deref() == Some("resource_missing")
            || self
                .message
                .as_deref()
                .is_some_and(|m| m.contains("No such "))
    }
}

// ============================================================================
// Webhook Event Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created: i64,
    pub data: StripeWebhookEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeWebhookEventData {
    pub object: serde_json::Value,
}

impl StripeWebhookEvent {
    pub fn object<T: for<'de> Deserialize<'de>>(&self) -> AppResult<T> {
        serde_json::from_value(self.data.object.clone()).map_err(|e| {
            AppError::InvalidInput(format!("Malformed {} payload: {}", self.event_type, e))
        })
    }
}
