use crate::database::error::DatabaseError;
use crate::database::stores::{Registration, RegistrationStore};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
struct RegistrationRow {
    id: Uuid,
    event_code: String,
    school_id: Uuid,
    attendees: i32,
    contact_phone: String,
    payment_status: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<RegistrationRow> for Registration {
    fn from(row: RegistrationRow) -> Self {
        Registration {
            id: row.id,
            event_code: row.event_code,
            school_id: row.school_id,
            attendees: row.attendees,
            contact_phone: row.contact_phone,
            payment_status: row.payment_status,
            created_at: row.created_at,
        }
    }
}

/// Repository for event registrations
pub struct RegistrationRepository {
    pool: PgPool,
}

impl RegistrationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RegistrationStore for RegistrationRepository {
    async fn find_or_create(
        &self,
        event_code: &str,
        school_id: Uuid,
        attendees: i32,
        contact_phone: &str,
    ) -> Result<Registration, DatabaseError> {
        // Upsert keyed by (event_code, school_id); a concurrent creator
        // wins and we read its row back.
        let row = sqlx::query_as::<_, RegistrationRow>(
            "INSERT INTO event_registrations \
             (id, event_code, school_id, attendees, contact_phone, payment_status, created_at) \
             VALUES ($1, $2, $3, $4, $5, 'unpaid', NOW()) \
             ON CONFLICT (event_code, school_id) DO UPDATE SET event_code = EXCLUDED.event_code \
             RETURNING id, event_code, school_id, attendees, contact_phone, payment_status, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(event_code)
        .bind(school_id)
        .bind(attendees)
        .bind(contact_phone)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.into())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Registration>, DatabaseError> {
        let row = sqlx::query_as::<_, RegistrationRow>(
            "SELECT id, event_code, school_id, attendees, contact_phone, payment_status, created_at \
             FROM event_registrations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(Registration::from))
    }

    async fn mark_paid(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE event_registrations SET payment_status = 'paid' WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}
