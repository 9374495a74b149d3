//! In-memory implementations of the local persistence ports, plus a clock
//! tests can move by hand.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::{
        clock::Clock,
        profile_store::{LocalProfileStore, WebhookEventLog},
    },
    domain::entities::{
        billing_subscription::CustomerId,
        entitlement::{BillingProfile, EntitlementUpdate},
    },
};

// ============================================================================
// InMemoryProfileStore
// ============================================================================

#[derive(Default)]
pub struct InMemoryProfileStore {
    pub profiles: Mutex<HashMap<Uuid, BillingProfile>>,
    /// Every update that went through the port, in order.
    pub updates: Mutex<Vec<(Uuid, EntitlementUpdate)>>,
    /// Number of upcoming `update` calls that fail with a database error.
    failing_updates: Mutex<usize>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: Vec<BillingProfile>) -> Self {
        let map = profiles.into_iter().map(|p| (p.user_id, p)).collect();
        Self {
            profiles: Mutex::new(map),
            ..Default::default()
        }
    }

    pub fn fail_next_updates(&self, count: usize) {
        *self.failing_updates.lock().unwrap() = count;
    }

    pub fn insert(&self, profile: BillingProfile) {
        self.profiles
            .lock()
            .unwrap()
            .insert(profile.user_id, profile);
    }

    pub fn profile(&self, user_id: Uuid) -> Option<BillingProfile> {
        self.profiles.lock().unwrap().get(&user_id).cloned()
    }

    /// Seed state directly, bypassing the update log.
    pub fn update_now(&self, user_id: Uuid, update: &EntitlementUpdate) {
        if let Some(profile) = self.profiles.lock().unwrap().get_mut(&user_id) {
            update.apply_to(&mut profile.entitlement);
        }
    }

    pub fn updates_for(&self, user_id: Uuid) -> Vec<EntitlementUpdate> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == user_id)
            .map(|(_, update)| update.clone())
            .collect()
    }
}

#[async_trait]
impl LocalProfileStore for InMemoryProfileStore {
    async fn get(&self, user_id: Uuid) -> AppResult<Option<BillingProfile>> {
        Ok(self.profile(user_id))
    }

    async fn update(&self, user_id: Uuid, update: &EntitlementUpdate) -> AppResult<()> {
        {
            let mut failing = self.failing_updates.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(AppError::Database("injected failure".into()));
            }
        }
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles.get_mut(&user_id).ok_or(AppError::NotFound)?;
        update.apply_to(&mut profile.entitlement);
        self.updates.lock().unwrap().push((user_id, update.clone()));
        Ok(())
    }

    async fn set_customer_handle(
        &self,
        user_id: Uuid,
        customer_id: Option<&CustomerId>,
    ) -> AppResult<()> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles.get_mut(&user_id).ok_or(AppError::NotFound)?;
        profile.customer_handle = customer_id.cloned();
        Ok(())
    }

    async fn find_user_by_customer(&self, customer_id: &CustomerId) -> AppResult<Option<Uuid>> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .values()
            .find(|p| p.customer_handle.as_ref() == Some(customer_id))
            .map(|p| p.user_id))
    }

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<Uuid>> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .map(|p| p.user_id))
    }
}

// ============================================================================
// InMemoryWebhookEventLog
// ============================================================================

#[derive(Default)]
pub struct InMemoryWebhookEventLog {
    pub processed: Mutex<HashMap<String, String>>,
}

impl InMemoryWebhookEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Event type recorded for a processed event id.
    pub fn event_type(&self, event_id: &str) -> Option<String> {
        self.processed.lock().unwrap().get(event_id).cloned()
    }
}

#[async_trait]
impl WebhookEventLog for InMemoryWebhookEventLog {
    async fn is_processed(&self, event_id: &str) -> AppResult<bool> {
        Ok(self.processed.lock().unwrap().contains_key(event_id))
    }

    async fn mark_processed(&self, event_id: &str, event_type: &str) -> AppResult<()> {
        self.processed
            .lock()
            .unwrap()
            .entry(event_id.to_string())
            .or_insert_with(|| event_type.to_string());
        Ok(())
    }
}

// ============================================================================
// ManualClock
// ============================================================================

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at(Utc::now())
    }
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
