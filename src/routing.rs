//! Application router configuration.

use axum::{Router, middleware, routing::post};

use crate::{
    AppState,
    bank_api::ApiProvider,
    logging::logging_middleware,
    retry::Sleeper,
    webhook::{WebhookState, receive_webhook},
};

/// The path the bank delivers webhook events to.
pub const WEBHOOK: &str = "/webhook";

/// Return a router with all the app's routes.
pub fn build_router<P, S>(state: AppState<P, S>) -> Router
where
    P: ApiProvider + 'static,
    S: Sleeper + 'static,
{
    Router::new()
        .route(WEBHOOK, post(receive_webhook::<P, S>))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(state)
}
