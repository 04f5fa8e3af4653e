//! Status poller
//!
//! Sweeps `pending` payments on a fixed interval and queries the gateway
//! for each one. Two independent conditions force a payment to `failed`:
//! wall-clock age past the timeout window, and the poll-retry ceiling.
//! A transport or protocol error never fails a payment by itself; the raw
//! response is persisted and the payment is retried on the next tick.

use crate::database::stores::PaymentStore;
use crate::domain::{Payment, PaymentStatus};
use crate::payments::traits::MomoGateway;
use crate::services::finalizer::Finalizer;
use crate::services::settlement::{apply_gateway_report, SettlementOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

const SCAN_BATCH_SIZE: i64 = 100;
const BANK_STATUS_TIMEOUT: &str = "TIMEOUT";
/// Sandbox settles a payment successfully once it has been polled this
/// many times, so the full finalize path can be exercised locally.
const SANDBOX_SUCCESS_AFTER: i32 = 3;

pub enum PollerMode {
    Live(Arc<dyn MomoGateway>),
    Sandbox,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval_secs: u64,
    pub timeout_mins: i64,
    pub max_retries: i32,
    pub concurrency: usize,
}

pub struct StatusPoller {
    payments: Arc<dyn PaymentStore>,
    finalizer: Arc<Finalizer>,
    mode: PollerMode,
    config: PollerConfig,
}

impl StatusPoller {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        finalizer: Arc<Finalizer>,
        mode: PollerMode,
        config: PollerConfig,
    ) -> Self {
        Self { payments, finalizer, mode, config }
    }

    /// Main poll loop; exits on the shutdown signal.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval_secs,
            timeout_mins = self.config.timeout_mins,
            max_retries = self.config.max_retries,
            sandbox = matches!(self.mode, PollerMode::Sandbox),
            "Status poller started"
        );

        let mut ticker = interval(Duration::from_secs(self.config.interval_secs));

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping status poller");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = Arc::clone(&self).process_cycle().await {
                        error!(error = %e, "Error in poll cycle");
                    }
                }
            }
        }

        info!("Status poller stopped");
    }

    /// One sweep over pending payments, with bounded per-payment
    /// concurrency so a single slow gateway call cannot stall the sweep.
    #[instrument(skip(self), fields(worker = "poller"))]
    async fn process_cycle(
        self: Arc<Self>,
    ) -> Result<(), crate::database::error::DatabaseError> {
        let pending = self
            .payments
            .list_by_status(PaymentStatus::Pending, SCAN_BATCH_SIZE)
            .await?;

        if pending.is_empty() {
            return Ok(());
        }

        debug!(count = pending.len(), "Polling pending payments");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();

        for payment in pending {
            let poller = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                poller.poll_one(payment).await;
            });
        }

        while tasks.join_next().await.is_some() {}

        Ok(())
    }

    /// Poll a single pending payment. All errors are recovered here.
    async fn poll_one(&self, payment: Payment) {
        // Age timeout is checked first and skips the gateway entirely.
        let age_mins = payment.age(chrono::Utc::now()).num_minutes();
        if age_mins >= self.config.timeout_mins {
            info!(
                payment_id = %payment.id,
                age_mins,
                "Payment exceeded timeout window, forcing failure"
            );
            if let Err(e) = self.payments.force_fail(payment.id, BANK_STATUS_TIMEOUT).await {
                error!(payment_id = %payment.id, error = %e, "Failed to time out payment");
            }
            return;
        }

        if payment.retries >= self.config.max_retries {
            info!(
                payment_id = %payment.id,
                retries = payment.retries,
                "Payment exceeded retry ceiling, forcing failure"
            );
            if let Err(e) = self.payments.force_fail(payment.id, BANK_STATUS_TIMEOUT).await {
                error!(payment_id = %payment.id, error = %e, "Failed to time out payment");
            }
            return;
        }

        let (retries, reported_status, trans_status) = match &self.mode {
            PollerMode::Sandbox => {
                let raw = serde_json::json!({ "sandbox": true });
                let retries = match self.payments.record_poll_attempt(payment.id, Some(&raw)).await
                {
                    Ok(retries) => retries,
                    Err(e) => {
                        error!(payment_id = %payment.id, error = %e, "Failed to record poll");
                        return;
                    }
                };
                let reported = if retries >= SANDBOX_SUCCESS_AFTER {
                    Some("paid".to_string())
                } else {
                    None
                };
                (retries, reported, None)
            }
            PollerMode::Live(gateway) => {
                match gateway.query_status(&payment.correlation_reference).await {
                    Ok(report) => {
                        let retries = match self
                            .payments
                            .record_poll_attempt(payment.id, Some(&report.raw))
                            .await
                        {
                            Ok(retries) => retries,
                            Err(e) => {
                                error!(payment_id = %payment.id, error = %e, "Failed to record poll");
                                return;
                            }
                        };
                        (retries, report.status_text, report.trans_status)
                    }
                    Err(e) => {
                        // Transport failure: audit it and count the attempt,
                        // but never fail the payment for a network blip.
                        warn!(
                            payment_id = %payment.id,
                            reference = %payment.correlation_reference,
                            error = %e,
                            "Gateway status query failed"
                        );
                        let raw = serde_json::json!({ "transport_error": e.to_string() });
                        let retries = match self
                            .payments
                            .record_poll_attempt(payment.id, Some(&raw))
                            .await
                        {
                            Ok(retries) => retries,
                            Err(e) => {
                                error!(payment_id = %payment.id, error = %e, "Failed to record poll");
                                return;
                            }
                        };
                        (retries, None, None)
                    }
                }
            }
        };

        let outcome = match apply_gateway_report(
            &self.payments,
            &self.finalizer,
            &payment,
            reported_status.as_deref(),
            trans_status.as_deref(),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(payment_id = %payment.id, error = %e, "Failed to apply gateway report");
                return;
            }
        };

        // Retry ceiling after the attempt: a payment the gateway keeps
        // reporting as in-flight eventually times out.
        if outcome == SettlementOutcome::StillPending && retries >= self.config.max_retries {
            info!(
                payment_id = %payment.id,
                retries,
                "Retry ceiling reached after poll, forcing failure"
            );
            if let Err(e) = self.payments.force_fail(payment.id, BANK_STATUS_TIMEOUT).await {
                error!(payment_id = %payment.id, error = %e, "Failed to time out payment");
            }
        }
    }
}
