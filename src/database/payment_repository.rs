use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::stores::PaymentStore;
use crate::domain::{
    DeferredRegistration, NewPayment, OwnerScope, Payee, Payment, PaymentStatus,
};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const PAYMENT_COLUMNS: &str = "id, correlation_reference, amount, network, phone, description, \
     payee_kind, payee_id, school_id, owner_kind, owner_id, status, bank_status, trans_status, \
     retries, deferred_payload, gateway_reference, gateway_response, finance_transaction_ids, \
     created_at, updated_at";

/// Raw payment row as stored. Enum-ish columns are TEXT and decoded into
/// domain types on the way out so a bad row surfaces as an explicit error
/// instead of a panic.
#[derive(Debug, Clone, FromRow)]
struct PaymentRow {
    id: Uuid,
    correlation_reference: String,
    amount: f64,
    network: String,
    phone: String,
    description: String,
    payee_kind: String,
    payee_id: String,
    school_id: Uuid,
    owner_kind: Option<String>,
    owner_id: Option<Uuid>,
    status: String,
    bank_status: Option<String>,
    trans_status: Option<String>,
    retries: i32,
    deferred_payload: Option<serde_json::Value>,
    gateway_reference: Option<String>,
    gateway_response: Option<serde_json::Value>,
    finance_transaction_ids: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let network = row
            .network
            .parse()
            .map_err(|e: String| DatabaseError::corrupt_row("payment", e))?;
        let status = row
            .status
            .parse()
            .map_err(|e: String| DatabaseError::corrupt_row("payment", e))?;
        let payee_kind = row
            .payee_kind
            .parse()
            .map_err(|e: String| DatabaseError::corrupt_row("payment", e))?;

        let owner = match (row.owner_kind, row.owner_id) {
            (Some(kind), Some(id)) => Some(OwnerScope {
                kind: kind
                    .parse()
                    .map_err(|e: String| DatabaseError::corrupt_row("payment", e))?,
                id,
            }),
            _ => None,
        };

        let deferred_payload = match row.deferred_payload {
            Some(value) => Some(
                serde_json::from_value::<DeferredRegistration>(value)
                    .map_err(|e| DatabaseError::corrupt_row("payment", e.to_string()))?,
            ),
            None => None,
        };

        let finance_transaction_ids = match row.finance_transaction_ids {
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| {
                    item.as_str()
                        .ok_or_else(|| {
                            DatabaseError::corrupt_row("payment", "non-string transaction id")
                        })
                        .and_then(|s| {
                            Uuid::parse_str(s).map_err(|e| {
                                DatabaseError::corrupt_row("payment", e.to_string())
                            })
                        })
                })
                .collect::<Result<Vec<_>, _>>()?,
            serde_json::Value::Null => Vec::new(),
            _ => {
                return Err(DatabaseError::corrupt_row(
                    "payment",
                    "finance_transaction_ids is not an array",
                ))
            }
        };

        Ok(Payment {
            id: row.id,
            correlation_reference: row.correlation_reference,
            amount: row.amount,
            network,
            phone: row.phone,
            description: row.description,
            payee: Payee { kind: payee_kind, id: row.payee_id },
            school_id: row.school_id,
            owner,
            status,
            bank_status: row.bank_status,
            trans_status: row.trans_status,
            retries: row.retries,
            deferred_payload,
            gateway_reference: row.gateway_reference,
            gateway_response: row.gateway_response,
            finance_transaction_ids,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Postgres-backed payment store. Every mutating write is conditional on
/// the row's current state, so concurrent pollers, callback handlers and
/// multiple process instances coordinate through the database alone.
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PaymentRepository {
    async fn create(&self, new: NewPayment) -> Result<Payment, DatabaseError> {
        let deferred_payload = new
            .deferred_payload
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| {
                DatabaseError::new(DatabaseErrorKind::QueryError { message: e.to_string() })
            })?;

        let sql = format!(
            "INSERT INTO payments \
             (id, correlation_reference, amount, network, phone, description, payee_kind, \
              payee_id, school_id, owner_kind, owner_id, status, retries, deferred_payload, \
              finance_transaction_ids, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'created', 0, $12, '[]'::jsonb, NOW(), NOW()) \
             RETURNING {}",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(Uuid::new_v4())
        .bind(&new.correlation_reference)
        .bind(new.amount)
        .bind(new.network.as_str())
        .bind(&new.phone)
        .bind(&new.description)
        .bind(new.payee.kind.as_str())
        .bind(&new.payee.id)
        .bind(new.school_id)
        .bind(new.owner.map(|o| o.kind.as_str()))
        .bind(new.owner.map(|o| o.id))
        .bind(deferred_payload)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Payment::try_from(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        let sql = format!("SELECT {} FROM payments WHERE id = $1", PAYMENT_COLUMNS);
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.map(Payment::try_from).transpose()
    }

    async fn find_by_correlation_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE correlation_reference = $1",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.map(Payment::try_from).transpose()
    }

    async fn find_active_by_payee(
        &self,
        school_id: Uuid,
        payee: &Payee,
    ) -> Result<Option<Payment>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payments \
             WHERE school_id = $1 AND payee_kind = $2 AND payee_id = $3 \
               AND status IN ('created', 'pending') \
             ORDER BY created_at ASC LIMIT 1",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(school_id)
            .bind(payee.kind.as_str())
            .bind(&payee.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.map(Payment::try_from).transpose()
    }

    async fn list_by_status(
        &self,
        status: PaymentStatus,
        limit: i64,
    ) -> Result<Vec<Payment>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE status = $1 ORDER BY created_at ASC LIMIT $2",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn mark_submitted(
        &self,
        id: Uuid,
        gateway_reference: Option<&str>,
        raw: Option<&serde_json::Value>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE payments \
             SET status = 'pending', gateway_reference = COALESCE($2, gateway_reference), \
                 gateway_response = COALESCE($3, gateway_response), updated_at = NOW() \
             WHERE id = $1 AND status = 'created'",
        )
        .bind(id)
        .bind(gateway_reference)
        .bind(raw)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_submission_failure(
        &self,
        id: Uuid,
        raw: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE payments SET gateway_response = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(raw)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(())
    }

    async fn record_poll_attempt(
        &self,
        id: Uuid,
        raw: Option<&serde_json::Value>,
    ) -> Result<i32, DatabaseError> {
        // Atomic increment; read-then-write would lose counts under
        // concurrent pollers.
        sqlx::query_scalar::<_, i32>(
            "UPDATE payments \
             SET retries = retries + 1, gateway_response = COALESCE($2, gateway_response), \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING retries",
        )
        .bind(id)
        .bind(raw)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        bank_status: Option<&str>,
        trans_status: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        if !PaymentStatus::can_transition(from, to) {
            return Ok(false);
        }

        let result = sqlx::query(
            "UPDATE payments \
             SET status = $3, bank_status = COALESCE($4, bank_status), \
                 trans_status = COALESCE($5, trans_status), updated_at = NOW() \
             WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(bank_status)
        .bind(trans_status)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    async fn force_fail(&self, id: Uuid, bank_status: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE payments \
             SET status = 'failed', bank_status = $2, updated_at = NOW() \
             WHERE id = $1 AND status IN ('created', 'pending')",
        )
        .bind(id)
        .bind(bank_status)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_finance_transaction(
        &self,
        id: Uuid,
        finance_transaction_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        // The emptiness guard enforces at most one ledger entry per payment
        // even when two finalizers race.
        let result = sqlx::query(
            "UPDATE payments \
             SET finance_transaction_ids = finance_transaction_ids || jsonb_build_array($2::text), \
                 updated_at = NOW() \
             WHERE id = $1 AND jsonb_array_length(finance_transaction_ids) = 0",
        )
        .bind(id)
        .bind(finance_transaction_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    async fn rebind_payee(&self, id: Uuid, payee: &Payee) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE payments \
             SET payee_kind = $2, payee_id = $3, updated_at = NOW() \
             WHERE id = $1 AND payee_kind = 'event_intent'",
        )
        .bind(id)
        .bind(payee.kind.as_str())
        .bind(&payee.id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}
