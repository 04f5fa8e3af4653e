use crate::database::error::DatabaseError;
use crate::database::stores::{FinanceStore, NewFinanceTransaction};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Repository for the finance ledger. Insert-only from the payment
/// subsystem's point of view; rows are never updated or deleted.
pub struct FinanceTransactionRepository {
    pool: PgPool,
}

impl FinanceTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FinanceStore for FinanceTransactionRepository {
    async fn create(&self, tx: NewFinanceTransaction) -> Result<Uuid, DatabaseError> {
        // Unique index on payment_id makes creation idempotent: a racing
        // finalizer gets the existing row's id back.
        sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO finance_transactions \
             (id, payment_id, amount, mode, reference, owner_kind, owner_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW()) \
             ON CONFLICT (payment_id) DO UPDATE SET payment_id = EXCLUDED.payment_id \
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(tx.payment_id)
        .bind(tx.amount)
        .bind(&tx.mode)
        .bind(&tx.reference)
        .bind(tx.owner.map(|o| o.kind.as_str()))
        .bind(tx.owner.map(|o| o.id))
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
