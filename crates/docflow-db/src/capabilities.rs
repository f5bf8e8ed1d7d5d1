//! Capability repository: learned vision-support records per model.

use sqlx::{Pool, Postgres, Row};

use async_trait::async_trait;
use docflow_core::{
    CapabilityRepository, Error, Result, VisionCapabilityRecord, VisionState,
};

/// PostgreSQL capability repository.
pub struct PgCapabilityRepository {
    pool: Pool<Postgres>,
}

impl PgCapabilityRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(r: &sqlx::postgres::PgRow) -> VisionCapabilityRecord {
        let state: String = r.get("state");
        VisionCapabilityRecord {
            key: r.get("key"),
            // An unparseable state reads as pending, which callers treat
            // as unknown.
            state: VisionState::parse(&state).unwrap_or(VisionState::PendingUnsupported),
            learned_at: r.get("learned_at"),
            expires_at: r.get("expires_at"),
            reason: r.get("reason"),
            evidence: r.get("evidence"),
            failure_count: r.get("failure_count"),
            last_failure_at: r.get("last_failure_at"),
        }
    }
}

#[async_trait]
impl CapabilityRepository for PgCapabilityRepository {
    async fn get(&self, key: &str) -> Result<Option<VisionCapabilityRecord>> {
        let row = sqlx::query(
            "SELECT key, state, learned_at, expires_at, reason, evidence,
                    failure_count, last_failure_at
             FROM model_capability WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_row))
    }

    async fn upsert(&self, record: &VisionCapabilityRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO model_capability (key, state, learned_at, expires_at, reason,
                                           evidence, failure_count, last_failure_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (key) DO UPDATE SET
                state = EXCLUDED.state,
                learned_at = EXCLUDED.learned_at,
                expires_at = EXCLUDED.expires_at,
                reason = EXCLUDED.reason,
                evidence = EXCLUDED.evidence,
                failure_count = EXCLUDED.failure_count,
                last_failure_at = EXCLUDED.last_failure_at",
        )
        .bind(&record.key)
        .bind(record.state.as_str())
        .bind(record.learned_at)
        .bind(record.expires_at)
        .bind(&record.reason)
        .bind(&record.evidence)
        .bind(record.failure_count)
        .bind(record.last_failure_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM model_capability WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
