//! Test app state builder for HTTP-level integration testing.
//!
//! `TestAppStateBuilder` wires the real use cases to the in-memory doubles
//! and hands the doubles back so tests can seed and inspect them.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use secrecy::SecretString;

use crate::{
    adapters::http::app_state::AppState,
    application::use_cases::trial_policy::TrialLength,
    domain::entities::entitlement::BillingProfile,
    infra::{config::AppConfig, setup::wire_app_state},
    test_utils::{
        InMemoryBillingProcessor, InMemoryProfileStore, InMemoryWebhookEventLog, ManualClock,
        test_prices,
    },
};

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

pub struct TestAppStateBuilder {
    pub processor: Arc<InMemoryBillingProcessor>,
    pub store: Arc<InMemoryProfileStore>,
    pub events: Arc<InMemoryWebhookEventLog>,
    pub clock: Arc<ManualClock>,
    trial_length: TrialLength,
}

impl TestAppStateBuilder {
    pub fn new() -> Self {
        Self {
            processor: Arc::new(InMemoryBillingProcessor::new()),
            store: Arc::new(InMemoryProfileStore::new()),
            events: Arc::new(InMemoryWebhookEventLog::new()),
            clock: Arc::new(ManualClock::default()),
            trial_length: TrialLength::default(),
        }
    }

    /// Add a billing profile to the test state.
    pub fn with_profile(self, profile: BillingProfile) -> Self {
        self.store.insert(profile);
        self
    }

    pub fn with_trial_days(mut self, days: &str) -> Self {
        self.trial_length = TrialLength::parse(Some(days));
        self
    }

    /// Build the AppState around the shared doubles.
    pub fn build(&self) -> AppState {
        let config = AppConfig {
            database_url: String::new(),
            bind_addr: "127.0.0.1:3001".parse::<SocketAddr>().unwrap(),
            cors_origin: HeaderValue::from_static("http://localhost:3000"),
            stripe_secret_key: SecretString::new("sk_test".into()),
            stripe_webhook_secret: SecretString::new(TEST_WEBHOOK_SECRET.into()),
            prices: test_prices(),
            trial_length: self.trial_length,
            recent_write_ttl: chrono::Duration::seconds(5),
            webhook_tolerance_secs: 300,
            log_json_file: None,
        };

        wire_app_state(
            config,
            self.processor.clone(),
            self.store.clone(),
            self.events.clone(),
            self.clock.clone(),
        )
    }
}

impl Default for TestAppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
