pub mod billing;
pub mod webhooks;

use axum::Router;

use crate::adapters::http::app_state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/users", billing::router())
        .nest("/billing", webhooks::router())
}
