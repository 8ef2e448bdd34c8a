//! The event log contract shared by every storage engine.
//!
//! The log is append-only: [`EventStore::append`] is the only mutation.
//! Reads come in two flavors, per-aggregate (ordered by version, unbounded)
//! and log-wide (ordered by position, bounded by the store's batch size).

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};

use crate::error::{ErrorCode, Result, StrandError};

use super::event::{AggregateId, NewEvent, Position, StoredEvent, Version};

/// Durable, append-only event log with optimistic concurrency control.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append a batch of events atomically.
    ///
    /// With `Some(expected)`, every event must target the same aggregate and
    /// the aggregate's current version must equal `expected`; the events get
    /// versions `expected + 1 ..= expected + n`. With `None`, every aggregate in
    /// the batch must not exist yet and its events get versions `1..=k` in
    /// input order. A version mismatch fails with `ConcurrencyConflict` and
    /// writes nothing. Never retried internally.
    async fn append(
        &self,
        events: Vec<NewEvent>,
        expected_version: Option<Version>,
    ) -> Result<Vec<StoredEvent>>;

    /// Events of one aggregate with `version > from_version`, ascending.
    async fn get_events(
        &self,
        aggregate_id: AggregateId,
        from_version: Option<Version>,
    ) -> Result<Vec<StoredEvent>>;

    /// Up to one batch of events with `position > from_position`, ascending.
    async fn get_all_events(&self, from_position: Option<Position>) -> Result<Vec<StoredEvent>>;

    /// Like [`get_all_events`](Self::get_all_events), restricted to one event type.
    async fn get_events_by_type(
        &self,
        event_type: &str,
        from_position: Option<Position>,
    ) -> Result<Vec<StoredEvent>>;

    /// Highest committed position, or 0 for an empty log.
    async fn get_last_position(&self) -> Result<Position>;
}

/// Engines log the storage failures they return; every other error is left
/// to the caller.
pub(crate) fn log_storage_failure(error: &StrandError) {
    if error.is_storage() {
        error.log();
    }
}

/// A validated append: what each aggregate must currently be at, and the
/// version each event will take.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendPlan {
    /// `(aggregate, required current version)`, sorted by aggregate id.
    pub expectations: Vec<(AggregateId, Version)>,
    /// Events in input order, each paired with its assigned version.
    pub events: Vec<(NewEvent, Version)>,
}

impl AppendPlan {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Validate an append request and assign versions.
///
/// Engines run this before touching storage, then check each expectation
/// under their own isolation mechanism.
pub fn plan_append(events: Vec<NewEvent>, expected_version: Option<Version>) -> Result<AppendPlan> {
    if events.is_empty() {
        return Ok(AppendPlan {
            expectations: Vec::new(),
            events: Vec::new(),
        });
    }

    let mut ids = HashSet::with_capacity(events.len());
    for event in &events {
        if event.event_type.trim().is_empty() {
            return Err(StrandError::invalid_input("event type must not be empty"));
        }
        if event.aggregate_type.trim().is_empty() {
            return Err(StrandError::invalid_input("aggregate type must not be empty"));
        }
        if !ids.insert(event.id) {
            return Err(StrandError::new(
                ErrorCode::DuplicateEvent,
                format!("event {} appears twice in one batch", event.id),
            ));
        }
    }

    match expected_version {
        Some(expected) => {
            if expected < 0 {
                return Err(StrandError::invalid_input(format!(
                    "expected version must not be negative, got {}",
                    expected
                )));
            }
            let aggregate_id = events[0].aggregate_id;
            if events.iter().any(|e| e.aggregate_id != aggregate_id) {
                return Err(StrandError::invalid_input(
                    "an append with an expected version must target a single aggregate",
                ));
            }
            let planned = events
                .into_iter()
                .zip(1..)
                .map(|(event, offset)| (event, expected + offset))
                .collect();
            Ok(AppendPlan {
                expectations: vec![(aggregate_id, expected)],
                events: planned,
            })
        }
        None => {
            let mut next: BTreeMap<AggregateId, Version> = BTreeMap::new();
            let planned = events
                .into_iter()
                .map(|event| {
                    let version = next.entry(event.aggregate_id).or_insert(0);
                    *version += 1;
                    let version = *version;
                    (event, version)
                })
                .collect();
            Ok(AppendPlan {
                expectations: next.into_keys().map(|id| (id, 0)).collect(),
                events: planned,
            })
        }
    }
}
