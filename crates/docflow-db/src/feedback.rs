//! Feedback repository: confirmed (ingestion, policy) pairs with feature
//! snapshots, consumed by the policy-match learner.

use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use async_trait::async_trait;
use docflow_core::{Error, FeedbackRepository, NewPolicyFeedback, PolicyFeedback, Result};

/// PostgreSQL feedback repository.
pub struct PgFeedbackRepository {
    pool: Pool<Postgres>,
}

impl PgFeedbackRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(r: &sqlx::postgres::PgRow) -> Result<PolicyFeedback> {
        Ok(PolicyFeedback {
            id: r.get("id"),
            owner_id: r.get("owner_id"),
            ingestion_id: r.get("ingestion_id"),
            policy_id: r.get("policy_id"),
            features: serde_json::from_value(r.get("features"))?,
            created_at: r.get("created_at"),
        })
    }
}

#[async_trait]
impl FeedbackRepository for PgFeedbackRepository {
    async fn upsert(&self, feedback: NewPolicyFeedback) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO policy_feedback (id, owner_id, ingestion_id, policy_id, features)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (owner_id, ingestion_id, policy_id)
             DO UPDATE SET features = EXCLUDED.features
             RETURNING id",
        )
        .bind(Uuid::now_v7())
        .bind(feedback.owner_id)
        .bind(feedback.ingestion_id)
        .bind(feedback.policy_id)
        .bind(serde_json::to_value(&feedback.features)?)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(id)
    }

    async fn list_for_owner(&self, owner_id: Uuid, limit: i64) -> Result<Vec<PolicyFeedback>> {
        let rows = sqlx::query(
            "SELECT id, owner_id, ingestion_id, policy_id, features, created_at
             FROM policy_feedback
             WHERE owner_id = $1
             ORDER BY created_at DESC
             LIMIT $2",
        )
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_row).collect()
    }
}
