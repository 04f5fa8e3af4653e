//! Gateway trait definition
//!
//! The submission worker and status poller talk to the aggregator only
//! through this interface, so tests can substitute a scripted gateway.

use crate::error::AppResult;
use crate::payments::types::{ChargeAccepted, ChargeRequest, StatusReport};
use async_trait::async_trait;

#[async_trait]
pub trait MomoGateway: Send + Sync {
    /// Submit a charge to the aggregator. The returned value carries the
    /// gateway-assigned transaction id (correlation only, never a key)
    /// and the raw accept body for audit.
    async fn submit_charge(&self, request: &ChargeRequest) -> AppResult<ChargeAccepted>;

    /// Query settlement status by the client's correlation reference.
    ///
    /// Transport failures are errors; any HTTP response, parseable or
    /// not, comes back as a report so the raw body can be persisted.
    async fn query_status(&self, correlation_reference: &str) -> AppResult<StatusReport>;
}
