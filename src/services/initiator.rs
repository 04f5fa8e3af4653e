//! Payment initiation
//!
//! Validates an incoming payment intent, deduplicates against an existing
//! non-terminal payment for the same payee, and persists a fresh payment
//! in `created` state. Gateway submission is deferred to the submission
//! worker, so missing gateway credentials are irrelevant here.

use crate::database::stores::{OwnershipResolver, PaymentStore};
use crate::domain::{
    correlation_reference, DeferredRegistration, Network, NewPayment, Payee, PaymentStatus,
};
use crate::error::{AppError, AppResult};
use crate::payments::types::normalize_msisdn;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// What the payment is paying for.
#[derive(Debug, Clone)]
pub enum PaymentTarget {
    Bill { bill_id: Uuid },
    Registration { registration_id: Uuid },
    /// Payment-first flow: the registration is created by the finalizer
    /// only after settlement.
    Event { event_code: String, attendees: i32, contact_phone: String },
}

#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub school_id: Uuid,
    pub amount: f64,
    pub network: Network,
    pub phone: String,
    pub description: String,
    pub target: PaymentTarget,
}

#[derive(Debug, Clone)]
pub struct InitiateOutcome {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    /// True when an existing non-terminal payment was returned instead of
    /// creating a new row.
    pub deduplicated: bool,
}

pub struct PaymentInitiator {
    payments: Arc<dyn PaymentStore>,
    ownership: Arc<dyn OwnershipResolver>,
}

impl PaymentInitiator {
    pub fn new(payments: Arc<dyn PaymentStore>, ownership: Arc<dyn OwnershipResolver>) -> Self {
        Self { payments, ownership }
    }

    pub async fn initiate(&self, request: InitiateRequest) -> AppResult<InitiateOutcome> {
        if request.amount <= 0.0 {
            return Err(AppError::validation("amount must be greater than zero"));
        }
        if request.phone.trim().is_empty() {
            return Err(AppError::validation("phone number is required"));
        }
        // Reject numbers the submission worker could never normalize, so
        // a bad intent fails synchronously instead of stalling in
        // `created` forever.
        normalize_msisdn(&request.phone).map_err(AppError::validation)?;

        let (payee, deferred_payload) = match &request.target {
            PaymentTarget::Bill { bill_id } => (Payee::bill(*bill_id), None),
            PaymentTarget::Registration { registration_id } => {
                (Payee::registration(*registration_id), None)
            }
            PaymentTarget::Event { event_code, attendees, contact_phone } => {
                if event_code.trim().is_empty() {
                    return Err(AppError::validation("event code is required"));
                }
                if *attendees <= 0 {
                    return Err(AppError::validation("attendees must be greater than zero"));
                }
                (
                    Payee::event_intent(event_code),
                    Some(DeferredRegistration {
                        event_code: event_code.clone(),
                        attendees: *attendees,
                        contact_phone: contact_phone.clone(),
                    }),
                )
            }
        };

        // Idempotent re-submission from a flaky client: hand back the
        // in-flight payment instead of creating a second row. Scoped to
        // the school so another school's payment for the same event code
        // is never returned.
        if let Some(existing) =
            self.payments.find_active_by_payee(request.school_id, &payee).await?
        {
            info!(
                payment_id = %existing.id,
                payee_kind = payee.kind.as_str(),
                payee_id = %payee.id,
                "Returning existing non-terminal payment for payee"
            );
            return Ok(InitiateOutcome {
                payment_id: existing.id,
                status: existing.status,
                deduplicated: true,
            });
        }

        // Ownership is best-effort; an unresolvable chain must not block
        // the payment.
        let ownership_lookup = match &payee.kind {
            crate::domain::PayeeKind::EventIntent => {
                self.ownership.resolve_school(request.school_id).await
            }
            _ => self.ownership.resolve(&payee).await,
        };
        let owner = match ownership_lookup {
            Ok(owner) => owner,
            Err(e) => {
                warn!(
                    payee_id = %payee.id,
                    error = %e,
                    "Ownership resolution failed, continuing without tenant scope"
                );
                None
            }
        };

        let reference = correlation_reference(request.school_id, &payee, chrono::Utc::now());

        let payment = self
            .payments
            .create(NewPayment {
                correlation_reference: reference,
                amount: request.amount,
                network: request.network,
                phone: request.phone.clone(),
                description: request.description.clone(),
                payee,
                school_id: request.school_id,
                owner,
                deferred_payload,
            })
            .await?;

        info!(
            payment_id = %payment.id,
            reference = %payment.correlation_reference,
            network = %payment.network,
            amount = payment.amount,
            "Payment created"
        );

        Ok(InitiateOutcome {
            payment_id: payment.id,
            status: payment.status,
            deduplicated: false,
        })
    }
}
