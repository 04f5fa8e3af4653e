//! Idempotent payment completion
//!
//! Invoked from exactly two call sites (status poller and webhook
//! handler), which may race. Each step guards itself with a conditional
//! write, so re-entering at any point is harmless:
//!
//! - Step A materializes the deferred registration and rebinds the payee;
//!   the kind-guarded rebind is the double-creation check.
//! - Step B posts the ledger entry; the emptiness-guarded append elects a
//!   single winner, and the ledger insert itself is idempotent per payment.
//! - Step C propagates balance/paid status. It runs on every finalize and
//!   is idempotent on its own: the bill reduction is keyed on the payment
//!   id, so a step-C failure after a successful step B is repaired by the
//!   next finalize instead of being lost.

use crate::database::stores::{
    BillStore, FinanceStore, NewFinanceTransaction, PaymentStore, RegistrationStore,
};
use crate::domain::{Payee, PayeeKind, Payment, PaymentStatus};
use crate::error::{AppError, AppResult};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const PAYMENT_MODE_MOMO: &str = "momo";

pub struct Finalizer {
    payments: Arc<dyn PaymentStore>,
    registrations: Arc<dyn RegistrationStore>,
    bills: Arc<dyn BillStore>,
    finances: Arc<dyn FinanceStore>,
}

impl Finalizer {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        registrations: Arc<dyn RegistrationStore>,
        bills: Arc<dyn BillStore>,
        finances: Arc<dyn FinanceStore>,
    ) -> Self {
        Self { payments, registrations, bills, finances }
    }

    /// Apply all success-side effects of a settled payment. Safe to call
    /// any number of times.
    pub async fn finalize(&self, payment_id: Uuid) -> AppResult<()> {
        let payment = self
            .payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound { entity: "payment", id: payment_id.to_string() })?;

        if payment.status != PaymentStatus::Successful {
            warn!(
                payment_id = %payment_id,
                status = %payment.status,
                "Finalize called for a non-successful payment, skipping"
            );
            return Ok(());
        }

        let payment = self.materialize_deferred_entity(payment).await?;
        self.post_ledger_entry(&payment).await?;
        self.propagate_to_payee(&payment).await?;

        Ok(())
    }

    /// Step A: payment-first flow only. Creates the registration the
    /// payment was for and rebinds the payee to it.
    async fn materialize_deferred_entity(&self, payment: Payment) -> AppResult<Payment> {
        if payment.payee.kind != PayeeKind::EventIntent {
            return Ok(payment);
        }

        let payload = match &payment.deferred_payload {
            Some(payload) => payload,
            None => {
                warn!(
                    payment_id = %payment.id,
                    "Event-intent payment has no deferred payload, nothing to materialize"
                );
                return Ok(payment);
            }
        };

        let registration = self
            .registrations
            .find_or_create(
                &payload.event_code,
                payment.school_id,
                payload.attendees,
                &payload.contact_phone,
            )
            .await?;

        let payee = Payee::registration(registration.id);
        let rebound = self.payments.rebind_payee(payment.id, &payee).await?;

        if rebound {
            info!(
                payment_id = %payment.id,
                registration_id = %registration.id,
                event_code = %payload.event_code,
                "Materialized deferred registration"
            );
            let mut payment = payment;
            payment.payee = payee;
            Ok(payment)
        } else {
            // A concurrent finalizer rebound first; pick up its result.
            let current = self
                .payments
                .find_by_id(payment.id)
                .await?
                .ok_or_else(|| AppError::NotFound {
                    entity: "payment",
                    id: payment.id.to_string(),
                })?;
            Ok(current)
        }
    }

    /// Step B: record exactly one finance transaction for this payment.
    async fn post_ledger_entry(&self, payment: &Payment) -> AppResult<()> {
        if !payment.finance_transaction_ids.is_empty() {
            return Ok(());
        }

        let finance_transaction_id = self
            .finances
            .create(NewFinanceTransaction {
                payment_id: payment.id,
                amount: payment.amount,
                mode: PAYMENT_MODE_MOMO.to_string(),
                reference: payment.correlation_reference.clone(),
                owner: payment.owner,
            })
            .await?;

        let appended = self
            .payments
            .append_finance_transaction(payment.id, finance_transaction_id)
            .await?;

        if appended {
            info!(
                payment_id = %payment.id,
                finance_transaction_id = %finance_transaction_id,
                amount = payment.amount,
                "Finance transaction recorded"
            );
        }

        Ok(())
    }

    /// Step C: balance/status propagation, dispatched on the payee kind.
    /// Safe to repeat; each arm is idempotent per payment.
    async fn propagate_to_payee(&self, payment: &Payment) -> AppResult<()> {
        match payment.payee.kind {
            PayeeKind::Bill => {
                let bill_id = Uuid::parse_str(&payment.payee.id).map_err(|_| {
                    AppError::validation(format!("payment {} has malformed bill id", payment.id))
                })?;
                match self.bills.reduce_balance(bill_id, payment.id, payment.amount).await? {
                    Some(bill) => {
                        info!(
                            payment_id = %payment.id,
                            bill_id = %bill.id,
                            balance = bill.balance,
                            paid = bill.paid,
                            "Bill balance reduced"
                        );
                    }
                    None => {
                        warn!(
                            payment_id = %payment.id,
                            bill_id = %bill_id,
                            "Bill not found during finalization"
                        );
                    }
                }
            }
            PayeeKind::Registration => {
                let registration_id = Uuid::parse_str(&payment.payee.id).map_err(|_| {
                    AppError::validation(format!(
                        "payment {} has malformed registration id",
                        payment.id
                    ))
                })?;
                if !self.registrations.mark_paid(registration_id).await? {
                    warn!(
                        payment_id = %payment.id,
                        registration_id = %registration_id,
                        "Registration not found during finalization"
                    );
                }
            }
            PayeeKind::EventIntent => {
                // Step A could not materialize (no payload); nothing to
                // propagate to.
                warn!(
                    payment_id = %payment.id,
                    "Settled payment still bound to an event intent"
                );
            }
        }

        Ok(())
    }
}
