//! In-memory store fakes and a scriptable gateway for integration tests.
//!
//! The fakes implement the same conditional-write semantics as the
//! Postgres repositories, so tests exercise the orchestration logic
//! against realistic persistence behavior.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schoolpay_backend::database::error::DatabaseError;
use schoolpay_backend::database::stores::{
    Bill, BillStore, FinanceStore, NewFinanceTransaction, OwnershipResolver, PaymentStore,
    Registration, RegistrationStore,
};
use schoolpay_backend::domain::{
    NewPayment, OwnerScope, Payee, PayeeKind, Payment, PaymentStatus,
};
use schoolpay_backend::error::{AppError, AppResult};
use schoolpay_backend::payments::traits::MomoGateway;
use schoolpay_backend::payments::types::{ChargeAccepted, ChargeRequest, StatusReport};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryPaymentStore {
    rows: Mutex<HashMap<Uuid, Payment>>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Payment> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    pub fn get(&self, id: Uuid) -> Option<Payment> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    /// Backdate a payment for timeout tests.
    pub fn set_created_at(&self, id: Uuid, created_at: DateTime<Utc>) {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
            row.created_at = created_at;
        }
    }

    pub fn set_retries(&self, id: Uuid, retries: i32) {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
            row.retries = retries;
        }
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn create(&self, new: NewPayment) -> Result<Payment, DatabaseError> {
        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            correlation_reference: new.correlation_reference,
            amount: new.amount,
            network: new.network,
            phone: new.phone,
            description: new.description,
            payee: new.payee,
            school_id: new.school_id,
            owner: new.owner,
            status: PaymentStatus::Created,
            bank_status: None,
            trans_status: None,
            retries: 0,
            deferred_payload: new.deferred_payload,
            gateway_reference: None,
            gateway_response: None,
            finance_transaction_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.rows.lock().unwrap().insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_correlation_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|p| p.correlation_reference == reference)
            .cloned())
    }

    async fn find_active_by_payee(
        &self,
        school_id: Uuid,
        payee: &Payee,
    ) -> Result<Option<Payment>, DatabaseError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|p| p.school_id == school_id && &p.payee == payee && !p.status.is_terminal())
            .cloned())
    }

    async fn list_by_status(
        &self,
        status: PaymentStatus,
        limit: i64,
    ) -> Result<Vec<Payment>, DatabaseError> {
        let mut matching: Vec<Payment> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|p| p.created_at);
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn mark_submitted(
        &self,
        id: Uuid,
        gateway_reference: Option<&str>,
        raw: Option<&serde_json::Value>,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row) if row.status == PaymentStatus::Created => {
                row.status = PaymentStatus::Pending;
                row.gateway_reference = gateway_reference.map(str::to_string);
                row.gateway_response = raw.cloned();
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_submission_failure(
        &self,
        id: Uuid,
        raw: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
            row.gateway_response = Some(raw.clone());
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_poll_attempt(
        &self,
        id: Uuid,
        raw: Option<&serde_json::Value>,
    ) -> Result<i32, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::corrupt_row("payment", "missing row"))?;
        row.retries += 1;
        if let Some(raw) = raw {
            row.gateway_response = Some(raw.clone());
        }
        row.updated_at = Utc::now();
        Ok(row.retries)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        bank_status: Option<&str>,
        trans_status: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row) if row.status == from => {
                row.status = to;
                if let Some(bank_status) = bank_status {
                    row.bank_status = Some(bank_status.to_string());
                }
                if let Some(trans_status) = trans_status {
                    row.trans_status = Some(trans_status.to_string());
                }
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn force_fail(&self, id: Uuid, bank_status: &str) -> Result<bool, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row) if !row.status.is_terminal() => {
                row.status = PaymentStatus::Failed;
                row.bank_status = Some(bank_status.to_string());
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_finance_transaction(
        &self,
        id: Uuid,
        finance_transaction_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row) if row.finance_transaction_ids.is_empty() => {
                row.finance_transaction_ids.push(finance_transaction_id);
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn rebind_payee(&self, id: Uuid, payee: &Payee) -> Result<bool, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row) if row.payee.kind == PayeeKind::EventIntent => {
                row.payee = payee.clone();
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct MemoryRegistrationStore {
    rows: Mutex<HashMap<Uuid, Registration>>,
}

impl MemoryRegistrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn get(&self, id: Uuid) -> Option<Registration> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn insert(&self, registration: Registration) {
        self.rows.lock().unwrap().insert(registration.id, registration);
    }
}

#[async_trait]
impl RegistrationStore for MemoryRegistrationStore {
    async fn find_or_create(
        &self,
        event_code: &str,
        school_id: Uuid,
        attendees: i32,
        contact_phone: &str,
    ) -> Result<Registration, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(existing) = rows
            .values()
            .find(|r| r.event_code == event_code && r.school_id == school_id)
        {
            return Ok(existing.clone());
        }
        let registration = Registration {
            id: Uuid::new_v4(),
            event_code: event_code.to_string(),
            school_id,
            attendees,
            contact_phone: contact_phone.to_string(),
            payment_status: "unpaid".to_string(),
            created_at: Utc::now(),
        };
        rows.insert(registration.id, registration.clone());
        Ok(registration)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Registration>, DatabaseError> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn mark_paid(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row) => {
                row.payment_status = "paid".to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct MemoryBillStore {
    rows: Mutex<HashMap<Uuid, Bill>>,
    applied_payments: Mutex<HashSet<Uuid>>,
}

impl MemoryBillStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bill: Bill) {
        self.rows.lock().unwrap().insert(bill.id, bill);
    }

    pub fn get(&self, id: Uuid) -> Option<Bill> {
        self.rows.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl BillStore for MemoryBillStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Bill>, DatabaseError> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn reduce_balance(
        &self,
        id: Uuid,
        payment_id: Uuid,
        amount: f64,
    ) -> Result<Option<Bill>, DatabaseError> {
        // One reduction per payment, like the Postgres reduction ledger.
        if !self.applied_payments.lock().unwrap().insert(payment_id) {
            return Ok(self.rows.lock().unwrap().get(&id).cloned());
        }
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row) => {
                row.balance = (row.balance - amount).max(0.0);
                row.paid = row.balance == 0.0;
                Ok(Some(row.clone()))
            }
            None => Ok(None),
        }
    }
}

/// Ledger fake, idempotent per payment like the Postgres repository.
#[derive(Default)]
pub struct MemoryFinanceStore {
    rows: Mutex<HashMap<Uuid, (Uuid, NewFinanceTransaction)>>,
}

impl MemoryFinanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn for_payment(&self, payment_id: Uuid) -> Option<(Uuid, NewFinanceTransaction)> {
        self.rows.lock().unwrap().get(&payment_id).cloned()
    }
}

#[async_trait]
impl FinanceStore for MemoryFinanceStore {
    async fn create(&self, tx: NewFinanceTransaction) -> Result<Uuid, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some((id, _)) = rows.get(&tx.payment_id) {
            return Ok(*id);
        }
        let id = Uuid::new_v4();
        rows.insert(tx.payment_id, (id, tx));
        Ok(id)
    }
}

/// Resolver returning a fixed scope, or `None` by default.
#[derive(Default)]
pub struct StaticOwnership {
    pub scope: Option<OwnerScope>,
}

#[async_trait]
impl OwnershipResolver for StaticOwnership {
    async fn resolve(&self, _payee: &Payee) -> Result<Option<OwnerScope>, DatabaseError> {
        Ok(self.scope)
    }

    async fn resolve_school(&self, _school_id: Uuid) -> Result<Option<OwnerScope>, DatabaseError> {
        Ok(self.scope)
    }
}

/// Development-mode configuration for handler tests.
pub fn test_config() -> schoolpay_backend::config::Config {
    use schoolpay_backend::config::{
        Config, DatabaseConfig, GatewayConfig, GatewayMode, ServerConfig, WorkerConfig,
    };
    Config {
        server: ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            environment: "development".to_string(),
        },
        database: DatabaseConfig {
            url: "postgres://localhost/schoolpay".to_string(),
            max_connections: 5,
        },
        gateway: GatewayConfig {
            mode: GatewayMode::Live,
            base_url: "https://gateway.example.org".to_string(),
            api_key: Some("sk_test".to_string()),
            callback_base_url: "https://api.example.org".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        },
        worker: WorkerConfig {
            submission_interval_secs: 10,
            poll_interval_secs: 30,
            poll_timeout_mins: 10,
            max_poll_retries: 20,
            poll_concurrency: 8,
        },
    }
}

/// Minimal valid payment input for tests that bypass the initiator.
pub fn sample_new_payment(payee: Payee, school_id: Uuid) -> NewPayment {
    let reference =
        schoolpay_backend::domain::correlation_reference(school_id, &payee, Utc::now());
    NewPayment {
        correlation_reference: reference,
        amount: 50.0,
        network: schoolpay_backend::domain::Network::Mtn,
        phone: "0241234567".to_string(),
        description: "Test payment".to_string(),
        payee,
        school_id,
        owner: None,
        deferred_payload: None,
    }
}

type ChargeOutcome = Result<ChargeAccepted, AppError>;
type StatusOutcome = Result<StatusReport, AppError>;

/// Scriptable gateway. Queued outcomes are consumed in order; once the
/// queue is empty, charges are accepted and status queries report no
/// settlement (payment stays pending).
#[derive(Default)]
pub struct FakeGateway {
    charge_script: Mutex<VecDeque<ChargeOutcome>>,
    status_script: Mutex<VecDeque<StatusOutcome>>,
    pub charge_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_charge(&self, outcome: ChargeOutcome) {
        self.charge_script.lock().unwrap().push_back(outcome);
    }

    pub fn queue_status(&self, outcome: StatusOutcome) {
        self.status_script.lock().unwrap().push_back(outcome);
    }

    pub fn queue_status_text(&self, status: &str) {
        self.queue_status(Ok(StatusReport {
            status_text: Some(status.to_string()),
            trans_status: Some("000".to_string()),
            raw: serde_json::json!({ "status": status }),
        }));
    }

    pub fn charge_call_count(&self) -> usize {
        self.charge_calls.load(Ordering::SeqCst)
    }

    pub fn status_call_count(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MomoGateway for FakeGateway {
    async fn submit_charge(&self, request: &ChargeRequest) -> AppResult<ChargeAccepted> {
        self.charge_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(outcome) = self.charge_script.lock().unwrap().pop_front() {
            return outcome;
        }
        Ok(ChargeAccepted {
            gateway_reference: Some(format!("gw-{}", request.client_reference)),
            raw: serde_json::json!({ "accepted": true }),
        })
    }

    async fn query_status(&self, _correlation_reference: &str) -> AppResult<StatusReport> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(outcome) = self.status_script.lock().unwrap().pop_front() {
            return outcome;
        }
        Ok(StatusReport {
            status_text: None,
            trans_status: None,
            raw: serde_json::json!({}),
        })
    }
}
