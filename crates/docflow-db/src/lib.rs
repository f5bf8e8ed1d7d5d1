//! # docflow-db
//!
//! PostgreSQL + pgvector persistence layer for docflow.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for ingestions, policies, and feedback
//! - Content-addressed chunk vectors with pgvector similarity search
//! - Learned vision-capability records
//! - A durable event sink backed by the `ingestion_event` table
//!
//! ## Example
//!
//! ```rust,ignore
//! use docflow_db::Database;
//! use docflow_core::IngestionRepository;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/docflow").await?;
//!
//!     let ingestion = db.ingestions.get(some_id).await?;
//!     println!("{} is {}", ingestion.filename, ingestion.status);
//!     Ok(())
//! }
//! ```

pub mod capabilities;
pub mod chunks;
pub mod events;
pub mod feedback;
pub mod ingestions;
pub mod policies;
pub mod pool;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

use tracing::warn;

use docflow_core::Result;

// Re-export repository implementations
pub use capabilities::PgCapabilityRepository;
pub use chunks::PgChunkRepository;
pub use events::PgEventSink;
pub use feedback::PgFeedbackRepository;
pub use ingestions::PgIngestionRepository;
pub use policies::PgPolicyRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Ingestion lifecycle repository.
    pub ingestions: PgIngestionRepository,
    /// Policy CRUD repository.
    pub policies: PgPolicyRepository,
    /// Chunk vector repository.
    pub chunks: PgChunkRepository,
    /// Vision-capability record repository.
    pub capabilities: PgCapabilityRepository,
    /// Policy-match feedback repository.
    pub feedback: PgFeedbackRepository,
    /// Durable pipeline event sink.
    pub events: PgEventSink,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            ingestions: PgIngestionRepository::new(pool.clone()),
            policies: PgPolicyRepository::new(pool.clone()),
            chunks: PgChunkRepository::new(pool.clone()),
            capabilities: PgCapabilityRepository::new(pool.clone()),
            feedback: PgFeedbackRepository::new(pool.clone()),
            events: PgEventSink::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| docflow_core::Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Liveness probe. Returns `Ok(false)` when the database is unreachable.
    pub async fn health_check(&self) -> Result<bool> {
        match sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(
                    subsystem = "db",
                    component = "pool",
                    op = "health_check",
                    error = %e,
                    "Database health check failed"
                );
                Ok(false)
            }
        }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
