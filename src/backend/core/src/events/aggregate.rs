//! Aggregate trait and implementations for event-sourced state reconstruction.
//!
//! Aggregates are domain objects rebuilt from their stream of events. Each
//! aggregate implements `Default` (empty state, version 0) and `apply` (fold
//! one event). Replaying the same history into a fresh instance always yields
//! the same state.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::agents::{AgentStatus, TaskId};
use crate::error::{Result, StrandError};

use super::event::{AggregateId, DomainEvent, StoredEvent, Version, AGENT_AGGREGATE_TYPE};

// =============================================================================
// Aggregate Trait
// =============================================================================

/// Trait for aggregates that can be reconstructed from their event history.
pub trait Aggregate: Default + Send {
    /// Value of the `aggregate_type` column for this aggregate's events.
    const AGGREGATE_TYPE: &'static str;

    fn id(&self) -> Option<AggregateId>;

    fn set_id(&mut self, id: AggregateId);

    /// Version of the last applied event; 0 for a fresh aggregate.
    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    /// Apply a single domain event to mutate state.
    ///
    /// Implementations must be pure functions of `(self, event)`: no I/O, no
    /// clock reads, no randomness. Every persisted event is valid by definition,
    /// so this cannot fail.
    fn apply(&mut self, event: &DomainEvent);

    /// Fold `events` into this aggregate.
    ///
    /// The slice must belong to this aggregate and continue its history
    /// without gaps (first event at `version() + 1`). The whole slice is
    /// validated and decoded before anything is applied, so a bad history
    /// leaves the aggregate untouched. Event types this build does not know
    /// are skipped with a warning; their version still counts.
    fn load_from_history(&mut self, events: &[StoredEvent]) -> Result<()> {
        let Some(first) = events.first() else {
            return Ok(());
        };
        let aggregate_id = first.aggregate_id;

        if let Some(own) = self.id() {
            if own != aggregate_id {
                return Err(StrandError::corrupt_history(
                    own,
                    format!("history belongs to aggregate {}", aggregate_id),
                ));
            }
        }

        let mut next = self.version() + 1;
        let mut decoded = Vec::with_capacity(events.len());
        for stored in events {
            if stored.aggregate_id != aggregate_id {
                return Err(StrandError::corrupt_history(
                    aggregate_id,
                    format!(
                        "event {} belongs to aggregate {}",
                        stored.id, stored.aggregate_id
                    ),
                ));
            }
            if stored.aggregate_type != Self::AGGREGATE_TYPE {
                return Err(StrandError::corrupt_history(
                    aggregate_id,
                    format!(
                        "event {} has aggregate type {}, expected {}",
                        stored.id,
                        stored.aggregate_type,
                        Self::AGGREGATE_TYPE
                    ),
                ));
            }
            if stored.version != next {
                return Err(StrandError::corrupt_history(
                    aggregate_id,
                    format!("expected version {}, found {}", next, stored.version),
                ));
            }
            next += 1;
            decoded.push(DomainEvent::decode(stored)?);
        }

        self.set_id(aggregate_id);
        for (stored, event) in events.iter().zip(decoded) {
            match event {
                Some(event) => self.apply(&event),
                None => warn!(
                    %aggregate_id,
                    event_type = %stored.event_type,
                    version = stored.version,
                    "Skipping unknown event type during replay"
                ),
            }
            self.set_version(stored.version);
        }

        Ok(())
    }
}

// =============================================================================
// Agent Aggregate
// =============================================================================

/// Reconstructed state of an agent derived from its event stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentAggregate {
    pub id: Option<AggregateId>,
    pub name: String,
    pub capabilities: Vec<String>,
    pub max_concurrent_tasks: Option<u32>,
    /// `None` until the agent has been created.
    pub status: Option<AgentStatus>,
    pub current_task: Option<TaskId>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub last_error: Option<String>,
    pub version: Version,
}

impl AgentAggregate {
    /// Whether an `AgentCreated` event has been applied.
    pub fn exists(&self) -> bool {
        self.status.is_some()
    }

    pub fn is_idle(&self) -> bool {
        self.status == Some(AgentStatus::Idle)
    }

    pub fn is_decommissioned(&self) -> bool {
        self.status == Some(AgentStatus::Decommissioned)
    }
}

impl Aggregate for AgentAggregate {
    const AGGREGATE_TYPE: &'static str = AGENT_AGGREGATE_TYPE;

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn set_id(&mut self, id: AggregateId) {
        self.id = Some(id);
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: &DomainEvent) {
        match event {
            DomainEvent::AgentCreated(e) => {
                self.name = e.name.clone();
                self.capabilities = e.capabilities.clone();
                self.max_concurrent_tasks = e.max_concurrent_tasks;
                self.status = Some(AgentStatus::Idle);
            }
            DomainEvent::TaskAssigned(e) => {
                self.current_task = Some(e.task_id);
                self.status = Some(AgentStatus::Busy);
            }
            DomainEvent::TaskCompleted(_) => {
                self.current_task = None;
                self.tasks_completed += 1;
                self.status = Some(AgentStatus::Idle);
            }
            DomainEvent::TaskFailed(e) => {
                self.current_task = None;
                self.tasks_failed += 1;
                self.last_error = Some(e.error.clone());
                self.status = Some(AgentStatus::Idle);
            }
            DomainEvent::AgentStatusChanged(e) => {
                self.status = Some(e.to);
            }
            DomainEvent::AgentDecommissioned(_) => {
                self.current_task = None;
                self.status = Some(AgentStatus::Decommissioned);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
