use std::sync::Arc;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::{
        billing_processor::{BillingProcessorPort, NewCustomer},
        clock::Clock,
        profile_store::LocalProfileStore,
    },
    domain::entities::{billing_subscription::CustomerId, entitlement::BillingProfile},
};

/// Whether resolution may create a customer when nothing else matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    LookupOnly,
    CreateIfMissing,
}

/// Turns a possibly stale cached customer handle into a live one.
///
/// Order: cached handle, then lookup by email, then (if allowed) creation.
/// Any hit other than the cached handle is written back to the profile so the
/// next resolution is a single lookup. Processor failures propagate; retrying
/// is the caller's business.
#[derive(Clone)]
pub struct CustomerHandleResolver {
    processor: Arc<dyn BillingProcessorPort>,
    store: Arc<dyn LocalProfileStore>,
    clock: Arc<dyn Clock>,
}

impl CustomerHandleResolver {
    pub fn new(
        processor: Arc<dyn BillingProcessorPort>,
        store: Arc<dyn LocalProfileStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            processor,
            store,
            clock,
        }
    }

    pub async fn resolve_for_profile(
        &self,
        profile: &BillingProfile,
        mode: ResolveMode,
    ) -> AppResult<Option<CustomerId>> {
        self.resolve(
            profile.user_id,
            profile.customer_handle.as_ref(),
            Some(profile.email.as_str()),
            mode,
        )
        .await
    }

    pub async fn resolve(
        &self,
        user_id: Uuid,
        cached: Option<&CustomerId>,
        email: Option<&str>,
        mode: ResolveMode,
    ) -> AppResult<Option<CustomerId>> {
        if let Some(handle) = cached {
            if self.processor.retrieve_customer(handle).await?.is_some() {
                return Ok(Some(handle.clone()));
            }
            tracing::info!(
                user_id = %user_id,
                customer_id = %handle,
                "Cached customer handle is stale, falling back"
            );
        }

        let email = email.map(str::trim).filter(|e| !e.is_empty());

        if let Some(email) = email {
            let matches = self.processor.find_customers_by_email(email).await?;
            if matches.len() > 1 {
                // First match wins; more than one is a data hygiene issue.
                tracing::warn!(
                    user_id = %user_id,
                    match_count = matches.len(),
                    chosen = %matches[0].customer_id,
                    "Multiple billing customers share this email"
                );
            }
            if let Some(found) = matches.into_iter().next() {
                self.store
                    .set_customer_handle(user_id, Some(&found.customer_id))
                    .await?;
                return Ok(Some(found.customer_id));
            }
        }

        if mode == ResolveMode::CreateIfMissing {
            let email = email.ok_or_else(|| {
                AppError::InvalidInput("An email is required to create a billing customer".into())
            })?;
            let created = self
                .processor
                .create_customer(
                    &NewCustomer {
                        email: email.to_string(),
                        user_id,
                    },
                    &self.idempotency_key(user_id),
                )
                .await?;
            self.store
                .set_customer_handle(user_id, Some(&created.customer_id))
                .await?;
            tracing::info!(
                user_id = %user_id,
                customer_id = %created.customer_id,
                "Created billing customer"
            );
            return Ok(Some(created.customer_id));
        }

        if cached.is_some() {
            self.store.set_customer_handle(user_id, None).await?;
        }
        Ok(None)
    }

    /// Scoped to one creation attempt, so a retried request cannot create a
    /// second customer.
    fn idempotency_key(&self, user_id: Uuid) -> String {
        format!("customer-create-{}-{}", user_id, self.clock.now().timestamp())
    }
}
