//! Shared settlement path
//!
//! Both the status poller and the webhook handler feed a gateway-reported
//! status through this function, so the two call sites map vocabulary,
//! transition status, and trigger finalization identically. Correctness
//! under the poller/webhook race comes from the conditional
//! `pending -> successful` write plus the finalizer's idempotency, not
//! from mutual exclusion here.

use crate::database::stores::PaymentStore;
use crate::domain::{Payment, PaymentStatus};
use crate::error::AppResult;
use crate::payments::types::map_gateway_status;
use crate::services::finalizer::Finalizer;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Payment settled successfully and finalization ran.
    Finalized,
    /// Gateway reported a terminal failure.
    MarkedFailed,
    /// Reported status does not settle the payment.
    StillPending,
    /// Payment was already terminal before this report.
    AlreadyTerminal,
}

pub async fn apply_gateway_report(
    payments: &Arc<dyn PaymentStore>,
    finalizer: &Finalizer,
    payment: &Payment,
    reported_status: Option<&str>,
    trans_status: Option<&str>,
) -> AppResult<SettlementOutcome> {
    if payment.status.is_terminal() {
        // Late report for a settled payment. Re-run finalize for a
        // successful one in case an earlier finalize attempt died before
        // completing its side effects; every step is idempotent.
        if payment.status == PaymentStatus::Successful {
            finalizer.finalize(payment.id).await?;
        }
        debug!(
            payment_id = %payment.id,
            status = %payment.status,
            "Ignoring gateway report for terminal payment"
        );
        return Ok(SettlementOutcome::AlreadyTerminal);
    }

    let mapped = reported_status.and_then(map_gateway_status);

    match mapped {
        Some(PaymentStatus::Successful) => {
            let won = payments
                .transition(
                    payment.id,
                    PaymentStatus::Pending,
                    PaymentStatus::Successful,
                    reported_status,
                    trans_status,
                )
                .await?;
            info!(
                payment_id = %payment.id,
                reference = %payment.correlation_reference,
                performed_transition = won,
                "Gateway reported settlement success"
            );
            // Both the transition winner and a racing loser attempt
            // finalization; the finalizer's guards make this safe.
            finalizer.finalize(payment.id).await?;
            Ok(SettlementOutcome::Finalized)
        }
        Some(PaymentStatus::Failed) => {
            payments
                .transition(
                    payment.id,
                    PaymentStatus::Pending,
                    PaymentStatus::Failed,
                    reported_status,
                    trans_status,
                )
                .await?;
            info!(
                payment_id = %payment.id,
                reference = %payment.correlation_reference,
                reported = ?reported_status,
                "Gateway reported settlement failure"
            );
            Ok(SettlementOutcome::MarkedFailed)
        }
        _ => Ok(SettlementOutcome::StillPending),
    }
}
