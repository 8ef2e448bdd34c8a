//! PostgreSQL-backed event log.
//!
//! An append runs in one transaction:
//!
//! 1. Take a transaction-scoped advisory lock per target aggregate. Keys are
//!    32-bit folds of the aggregate id, so distinct aggregates may share one;
//!    keys are deduplicated and taken in ascending key order, which keeps two
//!    overlapping batches from waiting on each other in a cycle.
//! 2. Read each aggregate's current max version and compare it with the
//!    expected version. A mismatch returns `ConcurrencyConflict`; dropping the
//!    transaction rolls it back.
//! 3. Take the log-wide advisory lock. Positions come from a sequence, and
//!    holding this lock from `nextval` to commit makes position order match
//!    commit order, so a reader tailing by position never skips a late commit.
//! 4. Insert the events in input order and commit.
//!
//! The `(aggregate_id, version)` unique constraint stays as the backstop: if
//! any path ever bypasses the lock, the duplicate insert surfaces as
//! `ConcurrencyConflict` instead of corrupting the version sequence.

use async_trait::async_trait;
use metrics::counter;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::{Result, StrandError};

use super::event::{AggregateId, EventId, NewEvent, Position, StoredEvent, Version};
use super::retry::{retry_read, RetryPolicy, Sleeper, TokioSleeper};
use super::store::{log_storage_failure, plan_append, AppendPlan, EventStore};

/// Unique constraint on `(aggregate_id, version)`.
pub const AGGREGATE_VERSION_CONSTRAINT: &str = "events_aggregate_version_unique";

/// Primary key on `id`.
pub const EVENT_ID_CONSTRAINT: &str = "events_pkey";

/// Advisory lock namespace for per-aggregate version checks.
const AGGREGATE_LOCK_SPACE: i32 = 1;

/// Advisory lock namespace for position assignment.
const LOG_LOCK_SPACE: i32 = 2;

const SELECT_COLUMNS: &str = "id, type AS event_type, aggregate_id, aggregate_type, \
                              version, position, payload, metadata";

/// An [`EventStore`] on a PostgreSQL `events` table.
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    batch_size: i64,
}

impl PgEventStore {
    pub fn new(pool: PgPool, config: &StoreConfig) -> Self {
        Self {
            pool,
            policy: RetryPolicy::from(config),
            sleeper: Arc::new(TokioSleeper),
            batch_size: config.batch_size.max(1),
        }
    }

    /// Replace the pause used between read attempts.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn write(&self, plan: AppendPlan) -> Result<Vec<StoredEvent>> {
        // Rolled back on drop unless committed below.
        let mut tx = self.pool.begin().await?;

        for key in lock_keys(&plan.expectations) {
            sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
                .bind(AGGREGATE_LOCK_SPACE)
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }

        for (aggregate_id, expected) in &plan.expectations {
            let current: i64 = sqlx::query_scalar(
                "SELECT COALESCE(MAX(version), 0) FROM events WHERE aggregate_id = $1",
            )
            .bind(aggregate_id.0)
            .fetch_one(&mut *tx)
            .await?;

            if current != *expected {
                debug!(%aggregate_id, expected, current, "Append rejected on stale version");
                return Err(StrandError::concurrency_conflict(aggregate_id, *expected, current));
            }
        }

        sqlx::query("SELECT pg_advisory_xact_lock($1, 0)")
            .bind(LOG_LOCK_SPACE)
            .execute(&mut *tx)
            .await?;

        let mut committed = Vec::with_capacity(plan.events.len());
        for (event, version) in plan.events {
            let metadata = serde_json::to_value(&event.metadata)?;
            let position: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO events (id, type, aggregate_id, aggregate_type, version, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING position
                "#,
            )
            .bind(event.id.0)
            .bind(&event.event_type)
            .bind(event.aggregate_id.0)
            .bind(&event.aggregate_type)
            .bind(version)
            .bind(&event.payload)
            .bind(&metadata)
            .fetch_one(&mut *tx)
            .await?;

            committed.push(event.into_stored(version, position));
        }

        tx.commit().await?;
        Ok(committed)
    }

    async fn fetch(&self, query: ReadQuery<'_>) -> Result<Vec<StoredEvent>> {
        let rows = match query {
            ReadQuery::Aggregate { aggregate_id, from_version } => {
                sqlx::query_as::<_, EventRow>(&format!(
                    "SELECT {SELECT_COLUMNS} FROM events \
                     WHERE aggregate_id = $1 AND version > $2 \
                     ORDER BY version ASC"
                ))
                .bind(aggregate_id.0)
                .bind(from_version)
                .fetch_all(&self.pool)
                .await?
            }
            ReadQuery::All { from_position } => {
                sqlx::query_as::<_, EventRow>(&format!(
                    "SELECT {SELECT_COLUMNS} FROM events \
                     WHERE position > $1 \
                     ORDER BY position ASC \
                     LIMIT $2"
                ))
                .bind(from_position)
                .bind(self.batch_size)
                .fetch_all(&self.pool)
                .await?
            }
            ReadQuery::ByType { event_type, from_position } => {
                sqlx::query_as::<_, EventRow>(&format!(
                    "SELECT {SELECT_COLUMNS} FROM events \
                     WHERE type = $1 AND position > $2 \
                     ORDER BY position ASC \
                     LIMIT $3"
                ))
                .bind(event_type)
                .bind(from_position)
                .bind(self.batch_size)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(StoredEvent::try_from).collect()
    }

    async fn read(&self, operation: &'static str, query: ReadQuery<'_>) -> Result<Vec<StoredEvent>> {
        retry_read(&self.policy, self.sleeper.as_ref(), operation, move || self.fetch(query))
            .await
            .inspect_err(log_storage_failure)
    }
}

#[derive(Debug, Clone, Copy)]
enum ReadQuery<'a> {
    Aggregate {
        aggregate_id: AggregateId,
        from_version: Version,
    },
    All {
        from_position: Position,
    },
    ByType {
        event_type: &'a str,
        from_position: Position,
    },
}

#[async_trait]
impl EventStore for PgEventStore {
    #[instrument(skip(self, events), fields(count = events.len()))]
    async fn append(
        &self,
        events: Vec<NewEvent>,
        expected_version: Option<Version>,
    ) -> Result<Vec<StoredEvent>> {
        let plan = plan_append(events, expected_version)?;
        if plan.is_empty() {
            return Ok(Vec::new());
        }

        let committed = self.write(plan).await.inspect_err(log_storage_failure)?;
        counter!("strand_events_appended_total").increment(committed.len() as u64);
        debug!(
            count = committed.len(),
            last_position = committed.last().map(|e| e.position),
            "Events appended"
        );
        Ok(committed)
    }

    #[instrument(skip(self))]
    async fn get_events(
        &self,
        aggregate_id: AggregateId,
        from_version: Option<Version>,
    ) -> Result<Vec<StoredEvent>> {
        let query = ReadQuery::Aggregate {
            aggregate_id,
            from_version: from_version.unwrap_or(0),
        };
        self.read("get_events", query).await
    }

    #[instrument(skip(self))]
    async fn get_all_events(&self, from_position: Option<Position>) -> Result<Vec<StoredEvent>> {
        let query = ReadQuery::All {
            from_position: from_position.unwrap_or(0),
        };
        self.read("get_all_events", query).await
    }

    #[instrument(skip(self))]
    async fn get_events_by_type(
        &self,
        event_type: &str,
        from_position: Option<Position>,
    ) -> Result<Vec<StoredEvent>> {
        let query = ReadQuery::ByType {
            event_type,
            from_position: from_position.unwrap_or(0),
        };
        self.read("get_events_by_type", query).await
    }

    async fn get_last_position(&self) -> Result<Position> {
        let pool = &self.pool;
        retry_read(&self.policy, self.sleeper.as_ref(), "get_last_position", move || async move {
            let position: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(position), 0) FROM events")
                .fetch_one(pool)
                .await?;
            Ok(position)
        })
        .await
        .inspect_err(log_storage_failure)
    }
}

// =============================================================================
// Internal helpers
// =============================================================================

/// Advisory lock key for one aggregate: the id's 128 bits folded to 32.
fn lock_key(aggregate_id: &AggregateId) -> i32 {
    let bits = aggregate_id.0.as_u128();
    let folded = (bits ^ (bits >> 32) ^ (bits >> 64) ^ (bits >> 96)) as u32;
    folded as i32
}

/// Distinct lock keys for a batch, in the order they must be taken.
fn lock_keys(expectations: &[(AggregateId, Version)]) -> Vec<i32> {
    let mut keys: Vec<i32> = expectations.iter().map(|(id, _)| lock_key(id)).collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}

/// Row type for reading events from the database.
#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    event_type: String,
    aggregate_id: Uuid,
    aggregate_type: String,
    version: i64,
    position: i64,
    payload: serde_json::Value,
    metadata: serde_json::Value,
}

impl TryFrom<EventRow> for StoredEvent {
    type Error = StrandError;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(StoredEvent {
            id: EventId(row.id),
            event_type: row.event_type,
            aggregate_id: AggregateId(row.aggregate_id),
            aggregate_type: row.aggregate_type,
            version: row.version,
            position: row.position,
            payload: row.payload,
            metadata: serde_json::from_value(row.metadata)?,
        })
    }
}
