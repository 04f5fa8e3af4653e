pub mod health;
pub mod payments;

use crate::AppState;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Build the HTTP router for the payment subsystem.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/payments", post(payments::initiate_payment))
        .route("/api/payments/:id", get(payments::payment_status))
        .route(
            "/api/payments/callback",
            get(payments::gateway_callback).post(payments::gateway_callback),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
