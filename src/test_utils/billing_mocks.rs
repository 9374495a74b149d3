//! In-memory billing processor.
//!
//! Keeps customers, subscriptions, payment methods and setup intents in memory
//! and mimics the processor behaviors the engine depends on: deleted customers
//! vanish from lookups, listings are newest first, customer creation honors
//! idempotency keys, and deleting a customer cancels its subscriptions and
//! detaches its cards. Failures can be injected globally or per method.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::billing_processor::{
        BillingProcessorPort, CreateSubscriptionRequest, CustomerInfo, NewCustomer,
        PaymentMethodInfo, SetupIntentInfo, SubscriptionMutation, USER_ID_METADATA_KEY,
        UpdateSubscriptionRequest,
    },
    domain::entities::{
        billing_subscription::{BillingSubscription, CustomerId, PaymentMethodId, SubscriptionId},
        subscription_status::SubscriptionStatus,
    },
    test_utils::create_test_subscription,
};

struct FakeCustomer {
    info: CustomerInfo,
    deleted: bool,
    default_payment_method: Option<PaymentMethodId>,
}

#[derive(Default)]
struct ProcessorState {
    next_id: u64,
    customers: Vec<FakeCustomer>,
    subscriptions: Vec<BillingSubscription>,
    payment_methods: Vec<PaymentMethodInfo>,
    setup_intents: Vec<(SetupIntentInfo, HashMap<String, String>)>,
    customers_by_idempotency_key: HashMap<String, CustomerId>,
    idempotency_keys: Vec<String>,
    create_requests: Vec<CreateSubscriptionRequest>,
    update_requests: Vec<(SubscriptionId, UpdateSubscriptionRequest)>,
    call_log: Vec<&'static str>,
    failure: Option<String>,
    method_failures: HashMap<String, String>,
}

impl ProcessorState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_{}", prefix, self.next_id)
    }

    /// Logs the call, then fails it if a failure was injected.
    fn record(&mut self, method: &'static str) -> AppResult<()> {
        self.call_log.push(method);
        match self.method_failures.get(method).or(self.failure.as_ref()) {
            Some(message) => Err(AppError::Processor(message.clone())),
            None => Ok(()),
        }
    }

    fn customer_mut(&mut self, customer_id: &CustomerId) -> Option<&mut FakeCustomer> {
        self.customers
            .iter_mut()
            .find(|c| &c.info.customer_id == customer_id)
    }

    fn live_customer_mut(&mut self, customer_id: &CustomerId) -> AppResult<&mut FakeCustomer> {
        self.customer_mut(customer_id)
            .filter(|c| !c.deleted)
            .ok_or_else(|| AppError::Processor(format!("No such customer: '{}'", customer_id)))
    }
}

#[derive(Default)]
pub struct InMemoryBillingProcessor {
    state: Mutex<ProcessorState>,
}

impl InMemoryBillingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ProcessorState> {
        self.state.lock().unwrap()
    }

    // ========================================================================
    // Seeding
    // ========================================================================

    pub fn add_customer(&self, email: &str, user_id: Option<Uuid>) -> CustomerId {
        let mut state = self.state();
        let customer_id = CustomerId::new(state.next_id("cus"));
        let metadata = user_id
            .map(|id| HashMap::from([(USER_ID_METADATA_KEY.to_string(), id.to_string())]))
            .unwrap_or_default();
        state.customers.push(FakeCustomer {
            info: CustomerInfo {
                customer_id: customer_id.clone(),
                email: Some(email.to_string()),
                metadata,
            },
            deleted: false,
            default_payment_method: None,
        });
        customer_id
    }

    pub fn mark_customer_deleted(&self, customer_id: &CustomerId) {
        if let Some(customer) = self.state().customer_mut(customer_id) {
            customer.deleted = true;
        }
    }

    pub fn add_subscription(
        &self,
        customer_id: &CustomerId,
        price_id: &str,
        status: SubscriptionStatus,
    ) -> SubscriptionId {
        self.add_subscription_with(customer_id, price_id, |s| s.status = status)
    }

    pub fn add_subscription_with(
        &self,
        customer_id: &CustomerId,
        price_id: &str,
        overrides: impl FnOnce(&mut BillingSubscription),
    ) -> SubscriptionId {
        let subscription = create_test_subscription(customer_id, price_id, overrides);
        let id = subscription.id.clone();
        self.state().subscriptions.push(subscription);
        id
    }

    pub fn add_payment_method(&self, customer_id: &CustomerId) -> PaymentMethodId {
        let mut state = self.state();
        let id = PaymentMethodId::new(state.next_id("pm"));
        state.payment_methods.push(PaymentMethodInfo {
            id: id.clone(),
            customer_id: Some(customer_id.clone()),
        });
        id
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Customer as stored, deleted or not.
    pub fn customer(&self, customer_id: &CustomerId) -> Option<CustomerInfo> {
        self.state()
            .customer_mut(customer_id)
            .map(|c| c.info.clone())
    }

    pub fn is_customer_deleted(&self, customer_id: &CustomerId) -> bool {
        self.state()
            .customer_mut(customer_id)
            .is_some_and(|c| c.deleted)
    }

    pub fn default_payment_method(&self, customer_id: &CustomerId) -> Option<PaymentMethodId> {
        self.state()
            .customer_mut(customer_id)
            .and_then(|c| c.default_payment_method.clone())
    }

    pub fn subscription(&self, subscription_id: &SubscriptionId) -> Option<BillingSubscription> {
        self.state()
            .subscriptions
            .iter()
            .find(|s| &s.id == subscription_id)
            .cloned()
    }

    pub fn customer_payment_methods(&self, customer_id: &CustomerId) -> Vec<PaymentMethodInfo> {
        self.state()
            .payment_methods
            .iter()
            .filter(|pm| pm.customer_id.as_ref() == Some(customer_id))
            .cloned()
            .collect()
    }

    pub fn create_requests(&self) -> Vec<CreateSubscriptionRequest> {
        self.state().create_requests.clone()
    }

    pub fn update_requests(&self) -> Vec<(SubscriptionId, UpdateSubscriptionRequest)> {
        self.state().update_requests.clone()
    }

    pub fn setup_intents(&self) -> Vec<(SetupIntentInfo, HashMap<String, String>)> {
        self.state().setup_intents.clone()
    }

    pub fn idempotency_keys(&self) -> Vec<String> {
        self.state().idempotency_keys.clone()
    }

    /// Number of calls made to `method`, failed ones included.
    pub fn calls(&self, method: &str) -> usize {
        self.state()
            .call_log
            .iter()
            .filter(|m| **m == method)
            .count()
    }

    /// Position of the first call to `method` across all calls.
    pub fn call_index(&self, method: &str) -> Option<usize> {
        self.state().call_log.iter().position(|m| *m == method)
    }

    pub fn total_calls(&self) -> usize {
        self.state().call_log.len()
    }

    // ========================================================================
    // Failure Injection
    // ========================================================================

    /// Every subsequent call fails with a processor error.
    pub fn fail_with(&self, message: &str) {
        self.state().failure = Some(message.to_string());
    }

    pub fn fail_on(&self, method: &str, message: &str) {
        self.state()
            .method_failures
            .insert(method.to_string(), message.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failure = None;
        state.method_failures.clear();
    }
}

#[async_trait]
impl BillingProcessorPort for InMemoryBillingProcessor {
    async fn retrieve_customer(&self, customer_id: &CustomerId) -> AppResult<Option<CustomerInfo>> {
        let mut state = self.state();
        state.record("retrieve_customer")?;
        Ok(state
            .customer_mut(customer_id)
            .filter(|c| !c.deleted)
            .map(|c| c.info.clone()))
    }

    async fn find_customers_by_email(&self, email: &str) -> AppResult<Vec<CustomerInfo>> {
        let mut state = self.state();
        state.record("find_customers_by_email")?;
        Ok(state
            .customers
            .iter()
            .rev()
            .filter(|c| !c.deleted && c.info.email.as_deref() == Some(email))
            .map(|c| c.info.clone())
            .collect())
    }

    async fn create_customer(
        &self,
        customer: &NewCustomer,
        idempotency_key: &str,
    ) -> AppResult<CustomerInfo> {
        let mut state = self.state();
        state.record("create_customer")?;
        state.idempotency_keys.push(idempotency_key.to_string());

        if let Some(existing) = state.customers_by_idempotency_key.get(idempotency_key).cloned() {
            if let Some(found) = state.customer_mut(&existing) {
                return Ok(found.info.clone());
            }
        }

        let customer_id = CustomerId::new(state.next_id("cus"));
        let info = CustomerInfo {
            customer_id: customer_id.clone(),
            email: Some(customer.email.clone()),
            metadata: HashMap::from([(
                USER_ID_METADATA_KEY.to_string(),
                customer.user_id.to_string(),
            )]),
        };
        state.customers.push(FakeCustomer {
            info: info.clone(),
            deleted: false,
            default_payment_method: None,
        });
        state
            .customers_by_idempotency_key
            .insert(idempotency_key.to_string(), customer_id);
        Ok(info)
    }

    async fn update_customer_metadata(
        &self,
        customer_id: &CustomerId,
        metadata: &HashMap<String, String>,
    ) -> AppResult<()> {
        let mut state = self.state();
        state.record("update_customer_metadata")?;
        let customer = state.live_customer_mut(customer_id)?;
        customer
            .info
            .metadata
            .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn set_default_payment_method(
        &self,
        customer_id: &CustomerId,
        payment_method_id: &PaymentMethodId,
    ) -> AppResult<()> {
        let mut state = self.state();
        state.record("set_default_payment_method")?;
        let customer = state.live_customer_mut(customer_id)?;
        customer.default_payment_method = Some(payment_method_id.clone());
        Ok(())
    }

    async fn delete_customer(&self, customer_id: &CustomerId) -> AppResult<()> {
        let mut state = self.state();
        state.record("delete_customer")?;
        let customer = state.live_customer_mut(customer_id)?;
        customer.deleted = true;
        customer.default_payment_method = None;

        for sub in state
            .subscriptions
            .iter_mut()
            .filter(|s| &s.customer_id == customer_id)
        {
            sub.status = SubscriptionStatus::Canceled;
        }
        for pm in state
            .payment_methods
            .iter_mut()
            .filter(|pm| pm.customer_id.as_ref() == Some(customer_id))
        {
            pm.customer_id = None;
        }
        Ok(())
    }

    async fn list_subscriptions(
        &self,
        customer_id: &CustomerId,
    ) -> AppResult<Vec<BillingSubscription>> {
        let mut state = self.state();
        state.record("list_subscriptions")?;
        Ok(state
            .subscriptions
            .iter()
            .rev()
            .filter(|s| &s.customer_id == customer_id)
            .cloned()
            .collect())
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<Option<BillingSubscription>> {
        let mut state = self.state();
        state.record("retrieve_subscription")?;
        Ok(state
            .subscriptions
            .iter()
            .find(|s| &s.id == subscription_id)
            .cloned())
    }

    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> AppResult<SubscriptionMutation> {
        let mut state = self.state();
        state.record("create_subscription")?;
        state.live_customer_mut(&request.customer_id)?;
        state.create_requests.push(request.clone());

        let id = state.next_id("sub");
        let item_id = state.next_id("si");
        let status = match (request.trial_end, request.require_payment_confirmation) {
            (Some(_), _) => SubscriptionStatus::Trialing,
            (None, true) => SubscriptionStatus::Incomplete,
            (None, false) => SubscriptionStatus::Active,
        };
        let subscription = BillingSubscription {
            id: SubscriptionId::new(id),
            customer_id: request.customer_id.clone(),
            status,
            price_id: request.price_id.clone(),
            item_id: Some(item_id),
            cancel_at_period_end: false,
            current_period_end: request
                .trial_end
                .unwrap_or_else(|| Utc::now() + Duration::days(30)),
            trial_end: request.trial_end,
        };
        state.subscriptions.push(subscription.clone());

        let payment_client_secret = (status == SubscriptionStatus::Incomplete)
            .then(|| format!("pi_{}_secret", subscription.id));

        Ok(SubscriptionMutation {
            subscription,
            payment_client_secret,
        })
    }

    async fn update_subscription(
        &self,
        subscription_id: &SubscriptionId,
        request: &UpdateSubscriptionRequest,
    ) -> AppResult<SubscriptionMutation> {
        let mut state = self.state();
        state.record("update_subscription")?;
        state
            .update_requests
            .push((subscription_id.clone(), request.clone()));

        let sub = state
            .subscriptions
            .iter_mut()
            .find(|s| &s.id == subscription_id)
            .ok_or_else(|| {
                AppError::Processor(format!("No such subscription: '{}'", subscription_id))
            })?;

        if let Some(swap) = &request.swap_price {
            if sub.item_id.as_deref() != Some(swap.item_id.as_str()) {
                return Err(AppError::Processor(format!(
                    "No such subscription item: '{}'",
                    swap.item_id
                )));
            }
            sub.price_id = swap.price_id.clone();
        }
        if let Some(cancel) = request.cancel_at_period_end {
            sub.cancel_at_period_end = cancel;
        }
        if let Some(trial_end) = request.trial_end {
            sub.status = SubscriptionStatus::Trialing;
            sub.trial_end = Some(trial_end);
            sub.current_period_end = trial_end;
        }

        // A price swap without trial bills the proration right away.
        let payment_client_secret = (request.require_payment_confirmation
            && request.trial_end.is_none()
            && request.swap_price.is_some())
        .then(|| format!("pi_{}_secret", sub.id));

        Ok(SubscriptionMutation {
            subscription: sub.clone(),
            payment_client_secret,
        })
    }

    async fn list_payment_methods(
        &self,
        customer_id: &CustomerId,
    ) -> AppResult<Vec<PaymentMethodInfo>> {
        let mut state = self.state();
        state.record("list_payment_methods")?;
        Ok(state
            .payment_methods
            .iter()
            .filter(|pm| pm.customer_id.as_ref() == Some(customer_id))
            .cloned()
            .collect())
    }

    async fn retrieve_payment_method(
        &self,
        payment_method_id: &PaymentMethodId,
    ) -> AppResult<Option<PaymentMethodInfo>> {
        let mut state = self.state();
        state.record("retrieve_payment_method")?;
        Ok(state
            .payment_methods
            .iter()
            .find(|pm| &pm.id == payment_method_id)
            .cloned())
    }

    async fn create_setup_intent(
        &self,
        customer_id: &CustomerId,
        metadata: &HashMap<String, String>,
    ) -> AppResult<SetupIntentInfo> {
        let mut state = self.state();
        state.record("create_setup_intent")?;
        state.live_customer_mut(customer_id)?;

        let id = state.next_id("seti");
        let intent = SetupIntentInfo {
            client_secret: format!("{}_secret", id),
            id,
        };
        state.setup_intents.push((intent.clone(), metadata.clone()));
        Ok(intent)
    }
}
