//! Policy repository.
//!
//! Match/extract/action specs are stored as JSONB documents and
//! deserialized into their typed forms on read, so a malformed stored spec
//! surfaces as a serialization error instead of a silent partial policy.

use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use async_trait::async_trait;
use docflow_core::{
    CreatePolicyRequest, Error, Policy, PolicyRepository, PolicyUpdate, Result,
};

/// PostgreSQL policy repository.
pub struct PgPolicyRepository {
    pool: Pool<Postgres>,
}

impl PgPolicyRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(r: &sqlx::postgres::PgRow) -> Result<Policy> {
        Ok(Policy {
            id: r.get("id"),
            owner_id: r.get("owner_id"),
            name: r.get("name"),
            priority: r.get("priority"),
            enabled: r.get("enabled"),
            match_spec: serde_json::from_value(r.get("match_spec"))?,
            extract_spec: serde_json::from_value(r.get("extract_spec"))?,
            action_spec: serde_json::from_value(r.get("action_spec"))?,
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        })
    }
}

#[async_trait]
impl PolicyRepository for PgPolicyRepository {
    async fn create(&self, req: CreatePolicyRequest) -> Result<Uuid> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO policy (id, owner_id, name, priority, enabled,
                                 match_spec, extract_spec, action_spec, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(id)
        .bind(req.owner_id)
        .bind(&req.name)
        .bind(req.priority)
        .bind(req.enabled)
        .bind(serde_json::to_value(&req.match_spec)?)
        .bind(serde_json::to_value(&req.extract_spec)?)
        .bind(serde_json::to_value(&req.action_spec)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Policy> {
        let row = sqlx::query(
            "SELECT id, owner_id, name, priority, enabled, match_spec, extract_spec,
                    action_spec, created_at, updated_at
             FROM policy WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(r) => Self::parse_row(&r),
            None => Err(Error::PolicyNotFound(id)),
        }
    }

    async fn list(&self, owner_id: Uuid) -> Result<Vec<Policy>> {
        let rows = sqlx::query(
            "SELECT id, owner_id, name, priority, enabled, match_spec, extract_spec,
                    action_spec, created_at, updated_at
             FROM policy
             WHERE owner_id = $1
             ORDER BY priority ASC, created_at ASC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn list_enabled(&self, owner_id: Uuid) -> Result<Vec<Policy>> {
        let rows = sqlx::query(
            "SELECT id, owner_id, name, priority, enabled, match_spec, extract_spec,
                    action_spec, created_at, updated_at
             FROM policy
             WHERE owner_id = $1 AND enabled = true
             ORDER BY priority ASC, created_at ASC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn update(&self, id: Uuid, update: PolicyUpdate) -> Result<()> {
        let match_spec = update
            .match_spec
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let extract_spec = update
            .extract_spec
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let action_spec = update
            .action_spec
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            "UPDATE policy SET
                name = COALESCE($2, name),
                priority = COALESCE($3, priority),
                enabled = COALESCE($4, enabled),
                match_spec = COALESCE($5, match_spec),
                extract_spec = COALESCE($6, extract_spec),
                action_spec = COALESCE($7, action_spec),
                updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(update.name)
        .bind(update.priority)
        .bind(update.enabled)
        .bind(match_spec)
        .bind(extract_spec)
        .bind(action_spec)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM policy WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
