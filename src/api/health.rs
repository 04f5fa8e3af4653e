use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::AppState;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub database_healthy: bool,
}

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    let version = env!("CARGO_PKG_VERSION").to_string();

    let database_healthy = crate::database::health_check(&state.pool).await.is_ok();

    let response = HealthResponse {
        status: if database_healthy { "healthy" } else { "degraded" }.to_string(),
        version,
        environment: state.config.server.environment.clone(),
        database_healthy,
    };

    Ok(Json(response))
}
