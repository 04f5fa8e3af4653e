pub mod api;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod payments;
pub mod services;
pub mod workers;

use crate::config::Config;
use crate::database::stores::PaymentStore;
use crate::services::finalizer::Finalizer;
use crate::services::initiator::PaymentInitiator;
use sqlx::PgPool;
use std::sync::Arc;

/// Shared handler state. Workers hold their own Arcs to the stores; this
/// is only what the HTTP layer needs.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pool: PgPool,
    pub payments: Arc<dyn PaymentStore>,
    pub initiator: Arc<PaymentInitiator>,
    pub finalizer: Arc<Finalizer>,
    /// HMAC secret for webhook signature validation. When unset (sandbox),
    /// unsigned callbacks are accepted.
    pub webhook_secret: Option<String>,
}
