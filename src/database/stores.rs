//! Store traits consumed by the orchestration services and workers.
//!
//! The Postgres repositories implement these; tests substitute in-memory
//! fakes. Every mutating payment operation is expressed as a conditional
//! write so that concurrent workers and multiple process instances stay
//! correct without in-process locks.

use crate::database::error::DatabaseError;
use crate::domain::{NewPayment, OwnerScope, Payee, Payment, PaymentStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Persistence for payment rows.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn create(&self, new: NewPayment) -> Result<Payment, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError>;

    async fn find_by_correlation_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payment>, DatabaseError>;

    /// Find a non-terminal (`created` or `pending`) payment for a payee
    /// initiated by the given school. Duplicate detection is scoped per
    /// school; two schools paying for the same event code are distinct
    /// payments.
    async fn find_active_by_payee(
        &self,
        school_id: Uuid,
        payee: &Payee,
    ) -> Result<Option<Payment>, DatabaseError>;

    /// Oldest-first batch of payments in the given status, claimable by a
    /// single worker instance.
    async fn list_by_status(
        &self,
        status: PaymentStatus,
        limit: i64,
    ) -> Result<Vec<Payment>, DatabaseError>;

    /// Conditional `created -> pending` transition recording the gateway's
    /// assigned reference and raw accept body. Returns false when the row
    /// was no longer in `created` (already submitted elsewhere).
    async fn mark_submitted(
        &self,
        id: Uuid,
        gateway_reference: Option<&str>,
        raw: Option<&serde_json::Value>,
    ) -> Result<bool, DatabaseError>;

    /// Persist a failed submission response for audit without any status
    /// change; the payment stays eligible for a later attempt.
    async fn record_submission_failure(
        &self,
        id: Uuid,
        raw: &serde_json::Value,
    ) -> Result<(), DatabaseError>;

    /// Atomically increment `retries` and store the raw poll response.
    /// Returns the new retry count. Called exactly once per poll attempt,
    /// success or failure.
    async fn record_poll_attempt(
        &self,
        id: Uuid,
        raw: Option<&serde_json::Value>,
    ) -> Result<i32, DatabaseError>;

    /// Compare-and-swap status transition: applies only while the row is
    /// still in `from`. Returns whether this caller performed the
    /// transition.
    async fn transition(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        bank_status: Option<&str>,
        trans_status: Option<&str>,
    ) -> Result<bool, DatabaseError>;

    /// Force a non-terminal payment to `failed` (timeout / retry ceiling).
    async fn force_fail(&self, id: Uuid, bank_status: &str) -> Result<bool, DatabaseError>;

    /// Append a finance transaction id, guarded on the set being empty.
    /// Returns false when another finalizer already posted the ledger entry.
    async fn append_finance_transaction(
        &self,
        id: Uuid,
        finance_transaction_id: Uuid,
    ) -> Result<bool, DatabaseError>;

    /// Rebind the payee to a concrete entity, guarded on the payee kind
    /// still being `event_intent`. The guard doubles as the
    /// double-materialization check for the payment-first flow.
    async fn rebind_payee(&self, id: Uuid, payee: &Payee) -> Result<bool, DatabaseError>;
}

/// Event registration created by the payment-first flow (or paid directly).
#[derive(Debug, Clone)]
pub struct Registration {
    pub id: Uuid,
    pub event_code: String,
    pub school_id: Uuid,
    pub attendees: i32,
    pub contact_phone: String,
    pub payment_status: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Idempotent creation keyed by `(event_code, school_id)`.
    async fn find_or_create(
        &self,
        event_code: &str,
        school_id: Uuid,
        attendees: i32,
        contact_phone: &str,
    ) -> Result<Registration, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Registration>, DatabaseError>;

    async fn mark_paid(&self, id: Uuid) -> Result<bool, DatabaseError>;
}

/// Outstanding school bill.
#[derive(Debug, Clone)]
pub struct Bill {
    pub id: Uuid,
    pub school_id: Uuid,
    pub description: String,
    pub balance: f64,
    pub paid: bool,
}

#[async_trait]
pub trait BillStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Bill>, DatabaseError>;

    /// Reduce the outstanding balance for a settled payment, clamped at
    /// zero, marking the bill paid when the balance reaches zero. Applied
    /// at most once per payment; a repeat call for the same payment
    /// returns the bill unchanged, so finalization can be re-entered.
    async fn reduce_balance(
        &self,
        id: Uuid,
        payment_id: Uuid,
        amount: f64,
    ) -> Result<Option<Bill>, DatabaseError>;
}

/// Ledger entry recorded once per settled payment.
#[derive(Debug, Clone)]
pub struct NewFinanceTransaction {
    pub payment_id: Uuid,
    pub amount: f64,
    pub mode: String,
    pub reference: String,
    pub owner: Option<OwnerScope>,
}

#[async_trait]
pub trait FinanceStore: Send + Sync {
    /// Idempotent creation keyed by `payment_id`: when two finalizers race,
    /// both receive the id of the single ledger row.
    async fn create(&self, tx: NewFinanceTransaction) -> Result<Uuid, DatabaseError>;
}

/// Derives the tenant a payment's proceeds belong to by walking from the
/// payee to its owning aggregate. Best-effort: unresolvable is `None`,
/// never an error surfaced to the initiator.
#[async_trait]
pub trait OwnershipResolver: Send + Sync {
    async fn resolve(&self, payee: &Payee) -> Result<Option<OwnerScope>, DatabaseError>;

    /// Direct school scope, used when the payee chain does not exist yet
    /// (payment-first event intents).
    async fn resolve_school(&self, school_id: Uuid) -> Result<Option<OwnerScope>, DatabaseError>;
}
