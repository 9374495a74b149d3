use std::net::SocketAddr;

use axum::http::HeaderValue;
use env_helpers::get_env_default;
use secrecy::SecretString;

use crate::{
    application::use_cases::trial_policy::TrialLength, domain::entities::plan::PlanPrices,
    infra::error::InfraError,
};

pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub cors_origin: HeaderValue,
    pub stripe_secret_key: SecretString,
    pub stripe_webhook_secret: SecretString,
    pub prices: PlanPrices,
    pub trial_length: TrialLength,
    /// How long a local billing write shields the user from webhook writes.
    pub recent_write_ttl: chrono::Duration,
    /// Maximum age of a webhook signature timestamp.
    pub webhook_tolerance_secs: i64,
    /// File receiving JSON logs, if set.
    pub log_json_file: Option<String>,
}

fn required(var: &'static str) -> Result<String, InfraError> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(InfraError::ConfigMissing { var })
}

impl AppConfig {
    pub fn from_env() -> Result<Self, InfraError> {
        let database_url = required("DATABASE_URL")?;
        let bind_addr: SocketAddr =
            get_env_default("BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3001)));
        let cors_origin: HeaderValue =
            get_env_default("CORS_ORIGIN", String::from("http://localhost:3000"))
                .parse()
                .map_err(|_| InfraError::ConfigInvalid { var: "CORS_ORIGIN" })?;

        let stripe_secret_key = SecretString::new(required("STRIPE_SECRET_KEY")?.into());
        let stripe_webhook_secret = SecretString::new(required("STRIPE_WEBHOOK_SECRET")?.into());
        let prices = PlanPrices::new(
            required("STRIPE_STARTER_PRICE_ID")?,
            required("STRIPE_PREMIUM_PRICE_ID")?,
        );

        // Parsed leniently: a bad value falls back to the default length.
        let trial_length = TrialLength::parse(std::env::var("TRIAL_DAYS").ok().as_deref());
        let recent_write_ttl_secs: i64 = get_env_default("RECENT_WRITE_TTL_SECS", 5);
        let webhook_tolerance_secs: i64 = get_env_default("WEBHOOK_TOLERANCE_SECS", 300);
        let log_json_file = std::env::var("LOG_JSON_FILE")
            .ok()
            .filter(|v| !v.trim().is_empty());

        Ok(Self {
            database_url,
            bind_addr,
            cors_origin,
            stripe_secret_key,
            stripe_webhook_secret,
            prices,
            trial_length,
            recent_write_ttl: chrono::Duration::seconds(recent_write_ttl_secs),
            webhook_tolerance_secs,
            log_json_file,
        })
    }
}
