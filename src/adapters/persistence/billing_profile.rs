use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::ports::profile_store::LocalProfileStore,
    domain::entities::{
        billing_subscription::CustomerId,
        entitlement::{BillingProfile, EntitlementUpdate, LocalEntitlement},
    },
};

fn row_to_profile(row: sqlx::postgres::PgRow) -> BillingProfile {
    BillingProfile {
        user_id: row.get("user_id"),
        email: row.get("email"),
        customer_handle: row
            .get::<Option<String>, _>("customer_handle")
            .map(CustomerId::new),
        entitlement: LocalEntitlement {
            plan: row.get("plan"),
            trial_used: row.get("trial_used"),
            trial_started_at: row.get("trial_started_at"),
            trial_end_at: row.get("trial_end_at"),
            cancellation_pending: row.get("cancellation_pending"),
            premium_end_at: row.get("premium_end_at"),
        },
    }
}

const SELECT_COLS: &str = "user_id, email, customer_handle, plan, trial_used, trial_started_at, \
                           trial_end_at, cancellation_pending, premium_end_at";

#[async_trait]
impl LocalProfileStore for PostgresPersistence {
    async fn get(&self, user_id: Uuid) -> AppResult<Option<BillingProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM billing_profiles WHERE user_id = $1",
            SELECT_COLS
        ))
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(row_to_profile))
    }

    async fn update(&self, user_id: Uuid, update: &EntitlementUpdate) -> AppResult<()> {
        // Nullable columns take a "touch" flag next to the value so that
        // "leave alone" and "set to NULL" stay distinct.
        let result = sqlx::query(
            r#"
            UPDATE billing_profiles SET
                plan = COALESCE($2, plan),
                trial_used = trial_used OR $3,
                trial_started_at = COALESCE($4, trial_started_at),
                trial_end_at = CASE WHEN $5 THEN $6 ELSE trial_end_at END,
                cancellation_pending = COALESCE($7, cancellation_pending),
                premium_end_at = CASE WHEN $8 THEN $9 ELSE premium_end_at END,
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(update.plan)
        .bind(update.mark_trial_used)
        .bind(update.trial_started_at)
        .bind(update.trial_end_at.is_some())
        .bind(update.trial_end_at.flatten())
        .bind(update.cancellation_pending)
        .bind(update.premium_end_at.is_some())
        .bind(update.premium_end_at.flatten())
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn set_customer_handle(
        &self,
        user_id: Uuid,
        customer_id: Option<&CustomerId>,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"UPDATE billing_profiles
               SET customer_handle = $2, updated_at = NOW()
               WHERE user_id = $1"#,
        )
        .bind(user_id)
        .bind(customer_id.map(|id| id.as_str()))
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn find_user_by_customer(&self, customer_id: &CustomerId) -> AppResult<Option<Uuid>> {
        let row = sqlx::query("SELECT user_id FROM billing_profiles WHERE customer_handle = $1")
            .bind(customer_id.as_str())
            .fetch_optional(self.pool())
            .await?;

        Ok(row.map(|r| r.get("user_id")))
    }

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<Uuid>> {
        let row = sqlx::query(
            r#"SELECT user_id FROM billing_profiles
               WHERE LOWER(email) = LOWER($1)
               ORDER BY created_at
               LIMIT 1"#,
        )
        .bind(email)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|r| r.get("user_id")))
    }
}
