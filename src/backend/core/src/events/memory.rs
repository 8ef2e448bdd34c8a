//! In-process event log.
//!
//! Same contract as the Postgres engine, held behind one mutex. Useful for
//! tests and for embedding Strand without a database. Read and append
//! failures can be injected to exercise the retry path.

use async_trait::async_trait;
use metrics::counter;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::config::StoreConfig;
use crate::error::{ErrorCode, Result, StrandError};

use super::event::{AggregateId, EventId, NewEvent, Position, StoredEvent, Version};
use super::retry::{retry_read, RetryPolicy, Sleeper, TokioSleeper};
use super::store::{log_storage_failure, plan_append, EventStore};

#[derive(Default)]
struct Log {
    /// Every committed event; index `i` holds position `i + 1`.
    events: Vec<StoredEvent>,
    /// Indexes into `events` per aggregate, in version order.
    streams: HashMap<AggregateId, Vec<usize>>,
    ids: HashSet<EventId>,
}

impl Log {
    fn current_version(&self, aggregate_id: &AggregateId) -> Version {
        self.streams
            .get(aggregate_id)
            .map_or(0, |stream| stream.len() as Version)
    }

    fn last_position(&self) -> Position {
        self.events.len() as Position
    }
}

/// An [`EventStore`] kept entirely in memory.
pub struct InMemoryEventStore {
    log: Mutex<Log>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    batch_size: i64,
    failing_reads: AtomicU32,
    failing_appends: AtomicU32,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::from_config(&StoreConfig::default())
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            log: Mutex::new(Log::default()),
            policy: RetryPolicy::from(config),
            sleeper: Arc::new(TokioSleeper),
            batch_size: config.batch_size.max(1),
            failing_reads: AtomicU32::new(0),
            failing_appends: AtomicU32::new(0),
        }
    }

    /// Replace the pause used between read attempts.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Make the next `n` read attempts fail with a transient storage error.
    pub fn fail_next_reads(&self, n: u32) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` appends fail with a transient storage error.
    pub fn fail_next_appends(&self, n: u32) {
        self.failing_appends.store(n, Ordering::SeqCst);
    }

    /// Number of committed events.
    pub fn len(&self) -> usize {
        self.log.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn injected_fault(counter: &AtomicU32, operation: &str) -> Result<()> {
        let armed = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            return Err(StrandError::storage_unavailable(format!(
                "injected failure in {}",
                operation
            )));
        }
        Ok(())
    }

    fn scan<P>(&self, from_position: Option<Position>, mut keep: P) -> Vec<StoredEvent>
    where
        P: FnMut(&StoredEvent) -> bool,
    {
        let log = self.log.lock();
        let start = from_position.unwrap_or(0).clamp(0, log.last_position()) as usize;
        log.events[start..]
            .iter()
            .filter(|e| keep(e))
            .take(self.batch_size as usize)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
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
        Self::injected_fault(&self.failing_appends, "append").inspect_err(log_storage_failure)?;

        let mut log = self.log.lock();

        for (aggregate_id, expected) in &plan.expectations {
            let current = log.current_version(aggregate_id);
            if current != *expected {
                debug!(%aggregate_id, expected, current, "Append rejected on stale version");
                return Err(StrandError::concurrency_conflict(aggregate_id, *expected, current));
            }
        }
        if let Some((event, _)) = plan.events.iter().find(|(e, _)| log.ids.contains(&e.id)) {
            return Err(StrandError::new(
                ErrorCode::DuplicateEvent,
                format!("event {} has already been stored", event.id),
            ));
        }

        let mut committed = Vec::with_capacity(plan.events.len());
        for (event, version) in plan.events {
            let index = log.events.len();
            let stored = event.into_stored(version, index as Position + 1);
            log.ids.insert(stored.id);
            log.streams.entry(stored.aggregate_id).or_default().push(index);
            log.events.push(stored.clone());
            committed.push(stored);
        }

        counter!("strand_events_appended_total").increment(committed.len() as u64);
        debug!(
            count = committed.len(),
            last_position = log.last_position(),
            "Events appended"
        );
        Ok(committed)
    }

    async fn get_events(
        &self,
        aggregate_id: AggregateId,
        from_version: Option<Version>,
    ) -> Result<Vec<StoredEvent>> {
        let from = from_version.unwrap_or(0).max(0) as usize;
        retry_read(&self.policy, self.sleeper.as_ref(), "get_events", move || async move {
            Self::injected_fault(&self.failing_reads, "get_events")?;
            let log = self.log.lock();
            let events: Vec<StoredEvent> = log
                .streams
                .get(&aggregate_id)
                .map(|stream| {
                    stream
                        .iter()
                        .skip(from)
                        .map(|&i| log.events[i].clone())
                        .collect()
                })
                .unwrap_or_default();
            Ok(events)
        })
        .await
        .inspect_err(log_storage_failure)
    }

    async fn get_all_events(&self, from_position: Option<Position>) -> Result<Vec<StoredEvent>> {
        retry_read(&self.policy, self.sleeper.as_ref(), "get_all_events", move || async move {
            Self::injected_fault(&self.failing_reads, "get_all_events")?;
            Ok(self.scan(from_position, |_| true))
        })
        .await
        .inspect_err(log_storage_failure)
    }

    async fn get_events_by_type(
        &self,
        event_type: &str,
        from_position: Option<Position>,
    ) -> Result<Vec<StoredEvent>> {
        retry_read(&self.policy, self.sleeper.as_ref(), "get_events_by_type", move || async move {
            Self::injected_fault(&self.failing_reads, "get_events_by_type")?;
            Ok(self.scan(from_position, |e| e.event_type == event_type))
        })
        .await
        .inspect_err(log_storage_failure)
    }

    async fn get_last_position(&self) -> Result<Position> {
        retry_read(&self.policy, self.sleeper.as_ref(), "get_last_position", move || async move {
            Self::injected_fault(&self.failing_reads, "get_last_position")?;
            Ok(self.log.lock().last_position())
        })
        .await
        .inspect_err(log_storage_failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::EventMetadata;
    use serde_json::json;

    fn event(aggregate_id: AggregateId, event_type: &str) -> NewEvent {
        NewEvent::new(
            event_type,
            aggregate_id,
            "Agent",
            json!({ "n": event_type }),
            EventMetadata::new("tester"),
        )
    }

    #[tokio::test]
    async fn test_first_write_yields_versions_from_one() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let stored = store
            .append(vec![event(id, "A"), event(id, "B"), event(id, "C")], None)
            .await
            .unwrap();

        let versions: Vec<_> = stored.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        let positions: Vec<_> = stored.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_first_write_on_existing_aggregate_conflicts() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store.append(vec![event(id, "A")], None).await.unwrap();

        let err = store.append(vec![event(id, "B")], None).await.unwrap_err();
        assert!(err.is_concurrency_conflict());
        assert_eq!(err.details().actual_version, Some(1));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_expected_version_writes_nothing() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store.append(vec![event(id, "A"), event(id, "B")], None).await.unwrap();

        let err = store
            .append(vec![event(id, "C"), event(id, "D")], Some(1))
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::ConcurrencyConflict);
        assert_eq!(store.get_events(id, None).await.unwrap().len(), 2);
        assert_eq!(store.get_last_position().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_get_events_from_version() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        let other = AggregateId::new();
        store.append(vec![event(id, "A"), event(id, "B")], None).await.unwrap();
        store.append(vec![event(other, "X")], None).await.unwrap();
        store.append(vec![event(id, "C")], Some(2)).await.unwrap();

        let tail = store.get_events(id, Some(1)).await.unwrap();
        let versions: Vec<_> = tail.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![2, 3]);
        assert!(store.get_events(AggregateId::new(), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_event_id_rejected() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        let first = event(id, "A");
        store.append(vec![first.clone()], None).await.unwrap();

        let mut replay = first;
        replay.aggregate_id = AggregateId::new();
        let err = store.append(vec![replay], None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateEvent);
    }

    #[tokio::test]
    async fn test_injected_append_failure_is_not_retried() {
        let store = InMemoryEventStore::new();
        store.fail_next_appends(1);
        let id = AggregateId::new();

        let err = store.append(vec![event(id, "A")], None).await.unwrap_err();
        assert!(err.is_storage());
        assert!(store.is_empty());

        store.append(vec![event(id, "A")], None).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_get_events_by_type_filters_and_bounds() {
        let store = InMemoryEventStore::new().with_batch_size(2);
        for _ in 0..3 {
            let id = AggregateId::new();
            store
                .append(vec![event(id, "Created"), event(id, "Renamed")], None)
                .await
                .unwrap();
        }

        let created = store.get_events_by_type("Created", None).await.unwrap();
        let positions: Vec<_> = created.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![1, 3]);

        let rest = store.get_events_by_type("Created", Some(3)).await.unwrap();
        let positions: Vec<_> = rest.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![5]);
    }
}
