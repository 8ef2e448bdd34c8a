//! Database layer for Strand.
//!
//! Uses PostgreSQL for the event log with sqlx. The schema lives in
//! `migrations/` and is embedded into the binary.

use serde::Serialize;
use sqlx::migrate::Migrator;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::{DatabaseConfig, StoreConfig};
use crate::error::Result;
use crate::events::PgEventStore;

/// Embedded schema migrations.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Database connection and bootstrap operations.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

/// Applied vs. pending migrations.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub applied: Vec<i64>,
    pub pending: Vec<i64>,
}

impl MigrationStatus {
    pub fn is_current(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        let db = Self { pool };
        if config.run_migrations {
            db.migrate().await?;
        }
        Ok(db)
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations...");
        let start = Instant::now();
        MIGRATOR.run(&self.pool).await.inspect_err(|e| {
            error!(error = %e, "Database migration failed");
        })?;
        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            "Database migrations completed"
        );
        Ok(())
    }

    /// Compare embedded migrations with those recorded in the database.
    pub async fn migration_status(&self) -> Result<MigrationStatus> {
        let table_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = '_sqlx_migrations')",
        )
        .fetch_one(&self.pool)
        .await?;

        let applied: Vec<i64> = if table_exists {
            sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success ORDER BY version")
                .fetch_all(&self.pool)
                .await?
        } else {
            Vec::new()
        };

        let pending = MIGRATOR
            .iter()
            .map(|m| m.version)
            .filter(|v| !applied.contains(v))
            .collect::<Vec<_>>();

        if !pending.is_empty() {
            warn!(pending_count = pending.len(), "Database has pending migrations");
        }

        Ok(MigrationStatus { applied, pending })
    }

    /// Check connectivity with a trivial query and return its latency.
    pub async fn ping(&self) -> Result<Duration> {
        let start = Instant::now();
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .inspect_err(|e| error!(error = %e, "Database connectivity check failed"))?;
        let latency = start.elapsed();
        if latency > Duration::from_millis(100) {
            warn!(
                latency_ms = latency.as_millis() as u64,
                "Database connectivity check latency is high"
            );
        }
        Ok(latency)
    }

    /// An event store over this pool.
    pub fn event_store(&self, config: &StoreConfig) -> PgEventStore {
        PgEventStore::new(self.pool.clone(), config)
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
