use async_trait::async_trait;

use crate::{
    adapters::persistence::PostgresPersistence, app_error::AppResult,
    application::ports::profile_store::WebhookEventLog,
};

#[async_trait]
impl WebhookEventLog for PostgresPersistence {
    async fn is_processed(&self, event_id: &str) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM processed_billing_events WHERE event_id = $1)",
        )
        .bind(event_id)
        .fetch_one(self.pool())
        .await?;

        Ok(exists)
    }

    async fn mark_processed(&self, event_id: &str, event_type: &str) -> AppResult<()> {
        // Concurrent deliveries of the same event may both get here.
        sqlx::query(
            r#"INSERT INTO processed_billing_events (event_id, event_type)
               VALUES ($1, $2)
               ON CONFLICT (event_id) DO NOTHING"#,
        )
        .bind(event_id)
        .bind(event_type)
        .execute(self.pool())
        .await?;

        Ok(())
    }
}
