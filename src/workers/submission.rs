//! Submission worker
//!
//! Takes `created` payments and submits them to the gateway's
//! charge-submission endpoint, advancing them to `pending`. A failed
//! submission leaves the payment in `created` for the next scan; the
//! status guard on `mark_submitted` prevents re-submitting a payment
//! another instance already advanced.

use crate::database::stores::PaymentStore;
use crate::domain::{Payment, PaymentStatus};
use crate::payments::traits::MomoGateway;
use crate::payments::types::{normalize_msisdn, ChargeRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

const SCAN_BATCH_SIZE: i64 = 50;

/// How charges reach the gateway. `Sandbox` is an explicit opt-in that
/// skips the gateway entirely so local workflows can run; a live
/// deployment with missing credentials never falls back to it.
pub enum SubmissionMode {
    Live(Arc<dyn MomoGateway>),
    Sandbox,
}

pub struct SubmissionWorker {
    payments: Arc<dyn PaymentStore>,
    mode: SubmissionMode,
    interval_secs: u64,
    callback_base_url: String,
}

/// Webhook URL embedding the correlation reference, so the gateway's
/// callback can be matched back to the payment.
pub fn callback_url(base_url: &str, correlation_reference: &str) -> String {
    format!(
        "{}/api/payments/callback?action=momo&reference={}",
        base_url.trim_end_matches('/'),
        correlation_reference
    )
}

impl SubmissionWorker {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        mode: SubmissionMode,
        interval_secs: u64,
        callback_base_url: String,
    ) -> Self {
        Self { payments, mode, interval_secs, callback_base_url }
    }

    /// Main worker loop; exits on the shutdown signal.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval_secs,
            sandbox = matches!(self.mode, SubmissionMode::Sandbox),
            "Submission worker started"
        );

        let mut ticker = interval(Duration::from_secs(self.interval_secs));

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping submission worker");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.process_cycle().await {
                        error!(error = %e, "Error in submission cycle");
                    }
                }
            }
        }

        info!("Submission worker stopped");
    }

    #[instrument(skip(self), fields(worker = "submission"))]
    async fn process_cycle(&self) -> Result<(), crate::database::error::DatabaseError> {
        let created = self
            .payments
            .list_by_status(PaymentStatus::Created, SCAN_BATCH_SIZE)
            .await?;

        if created.is_empty() {
            return Ok(());
        }

        debug!(count = created.len(), "Submitting created payments");

        for payment in created {
            self.submit_one(&payment).await;
        }

        Ok(())
    }

    /// Submit a single payment. Errors are recovered locally: the raw
    /// failure is persisted for audit and the payment stays `created`.
    async fn submit_one(&self, payment: &Payment) {
        match &self.mode {
            SubmissionMode::Sandbox => {
                let advanced = match self
                    .payments
                    .mark_submitted(
                        payment.id,
                        Some("sandbox"),
                        Some(&serde_json::json!({ "sandbox": true })),
                    )
                    .await
                {
                    Ok(advanced) => advanced,
                    Err(e) => {
                        error!(payment_id = %payment.id, error = %e, "Sandbox submit failed");
                        return;
                    }
                };
                if advanced {
                    info!(payment_id = %payment.id, "Sandbox mode: advanced payment to pending");
                }
            }
            SubmissionMode::Live(gateway) => {
                let phone = match normalize_msisdn(&payment.phone) {
                    Ok(phone) => phone,
                    Err(e) => {
                        // Initiator validation should make this unreachable.
                        warn!(payment_id = %payment.id, error = %e, "Unnormalizable phone number");
                        let _ = self
                            .payments
                            .record_submission_failure(
                                payment.id,
                                &serde_json::json!({ "error": e }),
                            )
                            .await;
                        return;
                    }
                };

                let request = ChargeRequest {
                    phone,
                    channel: payment.network.channel_code().to_string(),
                    amount: payment.amount,
                    description: payment.description.clone(),
                    callback_url: callback_url(
                        &self.callback_base_url,
                        &payment.correlation_reference,
                    ),
                    client_reference: payment.correlation_reference.clone(),
                };

                match gateway.submit_charge(&request).await {
                    Ok(accepted) => {
                        match self
                            .payments
                            .mark_submitted(
                                payment.id,
                                accepted.gateway_reference.as_deref(),
                                Some(&accepted.raw),
                            )
                            .await
                        {
                            Ok(true) => {
                                info!(
                                    payment_id = %payment.id,
                                    reference = %payment.correlation_reference,
                                    "Payment submitted, now pending"
                                );
                            }
                            Ok(false) => {
                                debug!(
                                    payment_id = %payment.id,
                                    "Payment no longer in created state, skipping transition"
                                );
                            }
                            Err(e) => {
                                error!(
                                    payment_id = %payment.id,
                                    error = %e,
                                    "Failed to persist submission result"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            payment_id = %payment.id,
                            reference = %payment.correlation_reference,
                            error = %e,
                            "Charge submission failed, payment stays created"
                        );
                        let _ = self
                            .payments
                            .record_submission_failure(
                                payment.id,
                                &serde_json::json!({ "error": e.to_string() }),
                            )
                            .await;
                    }
                }
            }
        }
    }
}
