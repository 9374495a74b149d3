use crate::{
    adapters::http::app_state::AppState,
    application::{
        helpers::recent_write_guard::RecentWriteGuard,
        ports::{
            billing_processor::BillingProcessorPort,
            clock::{Clock, SystemClock},
            profile_store::{LocalProfileStore, WebhookEventLog},
        },
        use_cases::{
            customer_handle::CustomerHandleResolver, payment_method::PaymentMethodManager,
            plan_transition::SubscriptionTransitionEngine, trial_policy::TrialEligibilityPolicy,
            webhook_reconciler::WebhookReconciler,
        },
    },
    infra::{
        config::AppConfig, error::InfraError, postgres_persistence,
        stripe_billing_adapter::StripeBillingAdapter,
    },
};
use std::fs::File;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub async fn init_app_state() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env()?;

    let postgres_arc = Arc::new(postgres_persistence(&config.database_url).await?);
    let store = postgres_arc.clone() as Arc<dyn LocalProfileStore>;
    let events = postgres_arc as Arc<dyn WebhookEventLog>;

    let processor: Arc<dyn BillingProcessorPort> = Arc::new(
        StripeBillingAdapter::new(config.stripe_secret_key.clone())
            .map_err(InfraError::BillingClient)?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    Ok(wire_app_state(config, processor, store, events, clock))
}

/// Builds the use cases around already constructed ports.
pub fn wire_app_state(
    config: AppConfig,
    processor: Arc<dyn BillingProcessorPort>,
    store: Arc<dyn LocalProfileStore>,
    events: Arc<dyn WebhookEventLog>,
    clock: Arc<dyn Clock>,
) -> AppState {
    let guard = Arc::new(RecentWriteGuard::new(
        config.recent_write_ttl,
        clock.clone(),
    ));
    let resolver = CustomerHandleResolver::new(processor.clone(), store.clone(), clock.clone());
    let trial_policy = TrialEligibilityPolicy::new(store.clone(), config.trial_length);

    let engine = SubscriptionTransitionEngine::new(
        processor.clone(),
        store.clone(),
        resolver.clone(),
        trial_policy,
        guard.clone(),
        clock.clone(),
        config.prices.clone(),
    );
    let payment_methods = PaymentMethodManager::new(
        processor.clone(),
        store.clone(),
        resolver,
        engine.clone(),
        guard.clone(),
    );
    let reconciler = WebhookReconciler::new(
        processor,
        store,
        events,
        guard,
        config.prices.clone(),
    );

    AppState {
        config: Arc::new(config),
        plan_use_cases: Arc::new(engine),
        payment_method_use_cases: Arc::new(payment_methods),
        webhook_reconciler: Arc::new(reconciler),
        clock,
    }
}

/// Installs the global subscriber: pretty console output, plus JSON lines
/// into `log_json_file` when one is configured. Safe to call more than once.
pub fn init_tracing(log_json_file: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "plan_reconciler=debug,tower_http=debug".into());

    // Console (pretty logs)
    let console_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .pretty();

    // File (structured JSON logs)
    let json_layer = log_json_file.and_then(|path| match File::create(path) {
        Ok(file) => Some(
            fmt::layer()
                .json()
                .with_writer(file)
                .with_current_span(true)
                .with_span_list(true)
                .boxed(),
        ),
        Err(err) => {
            eprintln!("Log file {path} could not be created: {err}");
            None
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .try_init()
        .ok();
}
