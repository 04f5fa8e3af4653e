use crate::database::error::DatabaseError;
use crate::database::stores::{Bill, BillStore};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
struct BillRow {
    id: Uuid,
    school_id: Uuid,
    description: String,
    balance: f64,
    paid: bool,
}

impl From<BillRow> for Bill {
    fn from(row: BillRow) -> Self {
        Bill {
            id: row.id,
            school_id: row.school_id,
            description: row.description,
            balance: row.balance,
            paid: row.paid,
        }
    }
}

/// Repository for school bills. Only the balance-reduction path is owned
/// here; bill creation belongs to the billing controllers.
pub struct BillRepository {
    pool: PgPool,
}

impl BillRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillStore for BillRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Bill>, DatabaseError> {
        let row = sqlx::query_as::<_, BillRow>(
            "SELECT id, school_id, description, balance, paid FROM bills WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(Bill::from))
    }

    async fn reduce_balance(
        &self,
        id: Uuid,
        payment_id: Uuid,
        amount: f64,
    ) -> Result<Option<Bill>, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        // The reduction ledger is keyed by payment id; only the insert
        // winner touches the balance, so a re-entered finalization can
        // retry this call without reducing twice.
        let claimed = sqlx::query(
            "INSERT INTO bill_reductions (payment_id, bill_id, amount, created_at) \
             VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (payment_id) DO NOTHING",
        )
        .bind(payment_id)
        .bind(id)
        .bind(amount)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let row = if claimed.rows_affected() > 0 {
            // Balance is clamped at zero in SQL so concurrent reductions
            // can never drive it negative.
            sqlx::query_as::<_, BillRow>(
                "UPDATE bills \
                 SET balance = GREATEST(balance - $2, 0), \
                     paid = (GREATEST(balance - $2, 0) = 0) \
                 WHERE id = $1 \
                 RETURNING id, school_id, description, balance, paid",
            )
            .bind(id)
            .bind(amount)
            .fetch_optional(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?
        } else {
            sqlx::query_as::<_, BillRow>(
                "SELECT id, school_id, description, balance, paid FROM bills WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?
        };

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(Bill::from))
    }
}
