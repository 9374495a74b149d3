use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::profile_store::LocalProfileStore,
    domain::entities::entitlement::LocalEntitlement,
};

pub const DEFAULT_TRIAL_DAYS: f64 = 30.0;

/// Longest trial Stripe accepts on a subscription.
pub const MAX_TRIAL_DAYS: f64 = 730.0;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Configured free-trial length in (possibly fractional) days.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialLength {
    days: f64,
}

impl Default for TrialLength {
    fn default() -> Self {
        Self {
            days: DEFAULT_TRIAL_DAYS,
        }
    }
}

impl TrialLength {
    /// Parses a decimal-days setting such as `"30"` or `"0.0416667"` (about
    /// one hour). Unset, unparsable, negative, non-finite or longer than
    /// [`MAX_TRIAL_DAYS`] values fall back to 30 days. `"0"` disables trials.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::default();
        };

        match raw.parse::<f64>() {
            Ok(days) if days.is_finite() && days >= 0.0 && days <= MAX_TRIAL_DAYS => {
                Self { days }
            }
            Ok(days) if days.is_finite() && days > MAX_TRIAL_DAYS => {
                tracing::warn!(
                    value = raw,
                    max_days = MAX_TRIAL_DAYS,
                    "Trial length exceeds maximum, using default"
                );
                Self::default()
            }
            _ => {
                tracing::warn!(value = raw, "Unparsable trial length, using default");
                Self::default()
            }
        }
    }

    pub fn days(&self) -> f64 {
        self.days
    }

    /// Whole seconds, rounded up so the granted trial is never shorter than
    /// configured.
    pub fn as_seconds(&self) -> i64 {
        // Absorb float noise such as 0.1 * 86400 = 8640.000000000001.
        (self.days * SECONDS_PER_DAY - 1e-6).ceil().max(0.0) as i64
    }
}

/// A trial the caller may attach to a subscription mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialGrant {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Decides whether a user still gets a free trial, and for how long.
///
/// Pure with respect to billing state. Whoever consumes a grant sets
/// `trial_used` together with the subscription mutation that carries it.
#[derive(Clone)]
pub struct TrialEligibilityPolicy {
    store: Arc<dyn LocalProfileStore>,
    length: TrialLength,
}

impl TrialEligibilityPolicy {
    pub fn new(store: Arc<dyn LocalProfileStore>, length: TrialLength) -> Self {
        Self { store, length }
    }

    pub fn length(&self) -> TrialLength {
        self.length
    }

    /// Trial days the user may still receive; 0 means no trial.
    pub async fn eligible_days(&self, user_id: Uuid) -> AppResult<f64> {
        let profile = self.store.get(user_id).await?.ok_or(AppError::NotFound)?;
        Ok(self.eligible_days_for(&profile.entitlement))
    }

    pub fn eligible_days_for(&self, entitlement: &LocalEntitlement) -> f64 {
        if entitlement.trial_used {
            0.0
        } else {
            self.length.days()
        }
    }

    pub fn grant_for(
        &self,
        entitlement: &LocalEntitlement,
        now: DateTime<Utc>,
    ) -> AppResult<Option<TrialGrant>> {
        if self.eligible_days_for(entitlement) <= 0.0 {
            return Ok(None);
        }

        let seconds = self.length.as_seconds();
        if seconds <= 0 {
            return Ok(None);
        }

        let ends_at = Duration::try_seconds(seconds)
            .and_then(|length| now.checked_add_signed(length))
            .ok_or_else(|| {
                AppError::Internal(format!("Trial of {seconds}s cannot be scheduled"))
            })?;
        Ok(Some(TrialGrant {
            starts_at: now,
            ends_at,
        }))
    }
}
