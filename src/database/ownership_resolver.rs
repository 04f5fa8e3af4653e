use crate::database::error::DatabaseError;
use crate::database::stores::OwnershipResolver;
use crate::domain::{OwnerKind, OwnerScope, Payee, PayeeKind};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
struct SchoolScopeRow {
    zone_id: Option<Uuid>,
    region_id: Option<Uuid>,
}

impl SchoolScopeRow {
    /// Zone is the closest owning aggregate; fall back to region. A school
    /// attached to neither has no resolvable scope.
    fn into_scope(self) -> Option<OwnerScope> {
        if let Some(zone_id) = self.zone_id {
            return Some(OwnerScope { kind: OwnerKind::Zone, id: zone_id });
        }
        self.region_id
            .map(|region_id| OwnerScope { kind: OwnerKind::Region, id: region_id })
    }
}

/// Derives tenant ownership by walking from a payee to the school that
/// owns it and from the school to its zone or region.
pub struct PgOwnershipResolver {
    pool: PgPool,
}

impl PgOwnershipResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OwnershipResolver for PgOwnershipResolver {
    async fn resolve(&self, payee: &Payee) -> Result<Option<OwnerScope>, DatabaseError> {
        let row = match payee.kind {
            PayeeKind::Bill => {
                let bill_id = match Uuid::parse_str(&payee.id) {
                    Ok(id) => id,
                    Err(_) => return Ok(None),
                };
                sqlx::query_as::<_, SchoolScopeRow>(
                    "SELECT s.zone_id, s.region_id FROM bills b \
                     JOIN schools s ON s.id = b.school_id WHERE b.id = $1",
                )
                .bind(bill_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?
            }
            PayeeKind::Registration => {
                let registration_id = match Uuid::parse_str(&payee.id) {
                    Ok(id) => id,
                    Err(_) => return Ok(None),
                };
                sqlx::query_as::<_, SchoolScopeRow>(
                    "SELECT s.zone_id, s.region_id FROM event_registrations r \
                     JOIN schools s ON s.id = r.school_id WHERE r.id = $1",
                )
                .bind(registration_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?
            }
            // No entity exists yet; the initiator resolves through the
            // initiating school instead.
            PayeeKind::EventIntent => {
                debug!(payee_id = %payee.id, "event intent has no payee chain to walk");
                None
            }
        };

        Ok(row.and_then(SchoolScopeRow::into_scope))
    }

    async fn resolve_school(&self, school_id: Uuid) -> Result<Option<OwnerScope>, DatabaseError> {
        let row = sqlx::query_as::<_, SchoolScopeRow>(
            "SELECT zone_id, region_id FROM schools WHERE id = $1",
        )
        .bind(school_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.and_then(SchoolScopeRow::into_scope))
    }
}
