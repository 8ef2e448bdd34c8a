//! Event definitions and domain events for event sourcing.
//!
//! This module provides:
//! - Identifier newtypes for events and aggregates
//! - `NewEvent` (before append) and `StoredEvent` (after commit) envelopes
//! - The `DomainEvent` sum type for the Agent aggregate, with an explicit
//!   mapping between the stored `type` discriminator and each payload shape

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::agents::{AgentStatus, TaskId};
use crate::error::{ErrorCode, Result, StrandError};

/// Position of an event within its aggregate's history, starting at 1.
pub type Version = i64;

/// Log-wide, store-assigned sequence number.
pub type Position = i64;

// =============================================================================
// Identifiers
// =============================================================================

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the aggregate an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(pub Uuid);

impl AggregateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AggregateId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for AggregateId {
    type Err = StrandError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| StrandError::invalid_input(format!("invalid aggregate id '{}': {}", s, e)))
    }
}

// =============================================================================
// Event Metadata
// =============================================================================

/// Causal and audit context carried by every event. Not interpreted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// User or service that issued the originating command
    #[serde(default)]
    pub user_id: String,

    /// When the originating command was issued
    pub timestamp: DateTime<Utc>,

    /// Shared by every event in one causal chain
    #[serde(default)]
    pub correlation_id: String,

    /// The command or event that directly caused this event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
}

impl EventMetadata {
    /// Metadata stamped with the current time and a fresh correlation id.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            timestamp: Utc::now(),
            correlation_id: Uuid::new_v4().to_string(),
            causation_id: None,
        }
    }

    /// Set the correlation ID.
    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    /// Set the causation ID.
    pub fn with_causation(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }

    /// Set the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

// =============================================================================
// Envelopes
// =============================================================================

/// An event handed to the store. Version and position are assigned on append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub id: EventId,
    pub event_type: String,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub payload: serde_json::Value,
    pub metadata: EventMetadata,
}

impl NewEvent {
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        payload: serde_json::Value,
        metadata: EventMetadata,
    ) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            payload,
            metadata,
        }
    }

    /// Attach the version and position assigned by the store.
    pub fn into_stored(self, version: Version, position: Position) -> StoredEvent {
        StoredEvent {
            id: self.id,
            event_type: self.event_type,
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type,
            version,
            position,
            payload: self.payload,
            metadata: self.metadata,
        }
    }
}

/// A committed event as read back from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: EventId,
    pub event_type: String,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub version: Version,
    pub position: Position,
    pub payload: serde_json::Value,
    pub metadata: EventMetadata,
}

// =============================================================================
// Domain Events - Agent
// =============================================================================

/// Event: An agent was registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCreated {
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_tasks: Option<u32>,
}

/// Event: A task was handed to an idle agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssigned {
    pub task_id: TaskId,
    pub description: String,
}

/// Event: The agent's current task finished successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompleted {
    pub task_id: TaskId,
    #[serde(default)]
    pub result: serde_json::Value,
}

/// Event: The agent's current task failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailed {
    pub task_id: TaskId,
    pub error: String,
}

/// Event: An agent's status changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusChanged {
    pub from: AgentStatus,
    pub to: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Event: An agent was retired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDecommissioned {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// =============================================================================
// Event Enumeration
// =============================================================================

/// All domain events in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DomainEvent {
    AgentCreated(AgentCreated),
    TaskAssigned(TaskAssigned),
    TaskCompleted(TaskCompleted),
    TaskFailed(TaskFailed),
    AgentStatusChanged(AgentStatusChanged),
    AgentDecommissioned(AgentDecommissioned),
}

/// The aggregate kind all `DomainEvent`s belong to.
pub const AGENT_AGGREGATE_TYPE: &str = "Agent";

impl DomainEvent {
    /// The discriminator stored in the `type` column.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::AgentCreated(_) => "AgentCreated",
            DomainEvent::TaskAssigned(_) => "TaskAssigned",
            DomainEvent::TaskCompleted(_) => "TaskCompleted",
            DomainEvent::TaskFailed(_) => "TaskFailed",
            DomainEvent::AgentStatusChanged(_) => "AgentStatusChanged",
            DomainEvent::AgentDecommissioned(_) => "AgentDecommissioned",
        }
    }

    pub fn aggregate_type(&self) -> &'static str {
        AGENT_AGGREGATE_TYPE
    }

    /// Serialize just the payload, without the type tag.
    pub fn payload(&self) -> Result<serde_json::Value> {
        let value = match self {
            DomainEvent::AgentCreated(e) => serde_json::to_value(e),
            DomainEvent::TaskAssigned(e) => serde_json::to_value(e),
            DomainEvent::TaskCompleted(e) => serde_json::to_value(e),
            DomainEvent::TaskFailed(e) => serde_json::to_value(e),
            DomainEvent::AgentStatusChanged(e) => serde_json::to_value(e),
            DomainEvent::AgentDecommissioned(e) => serde_json::to_value(e),
        };
        value.map_err(|e| {
            StrandError::with_internal(
                ErrorCode::SerializationError,
                "Failed to serialize event payload",
                e.to_string(),
            )
        })
    }

    /// Wrap this event for appending to `aggregate_id`'s history.
    pub fn to_new_event(
        &self,
        aggregate_id: AggregateId,
        metadata: EventMetadata,
    ) -> Result<NewEvent> {
        Ok(NewEvent::new(
            self.event_type(),
            aggregate_id,
            self.aggregate_type(),
            self.payload()?,
            metadata,
        ))
    }

    /// Decode a stored event.
    ///
    /// Returns `Ok(None)` for a type this build does not know about, and an
    /// error when a known type carries a payload that does not fit its shape.
    pub fn decode(stored: &StoredEvent) -> Result<Option<DomainEvent>> {
        let payload = stored.payload.clone();
        let decoded = match stored.event_type.as_str() {
            "AgentCreated" => serde_json::from_value(payload).map(DomainEvent::AgentCreated),
            "TaskAssigned" => serde_json::from_value(payload).map(DomainEvent::TaskAssigned),
            "TaskCompleted" => serde_json::from_value(payload).map(DomainEvent::TaskCompleted),
            "TaskFailed" => serde_json::from_value(payload).map(DomainEvent::TaskFailed),
            "AgentStatusChanged" => {
                serde_json::from_value(payload).map(DomainEvent::AgentStatusChanged)
            }
            "AgentDecommissioned" => {
                serde_json::from_value(payload).map(DomainEvent::AgentDecommissioned)
            }
            _ => return Ok(None),
        };

        decoded.map(Some).map_err(|e| {
            StrandError::with_internal(
                ErrorCode::DeserializationError,
                format!("Malformed {} payload", stored.event_type),
                e.to_string(),
            )
            .with_context("event_id", stored.id.to_string())
            .with_context("version", stored.version)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stored(event_type: &str, payload: serde_json::Value) -> StoredEvent {
        NewEvent::new(
            event_type,
            AggregateId::new(),
            AGENT_AGGREGATE_TYPE,
            payload,
            EventMetadata::new("tester"),
        )
        .into_stored(1, 1)
    }

    #[test]
    fn test_event_id_generation() {
        let id1 = EventId::new();
        let id2 = EventId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_aggregate_id_parse() {
        let id = AggregateId::new();
        assert_eq!(id.to_string().parse::<AggregateId>().unwrap(), id);
        assert!("not-a-uuid".parse::<AggregateId>().is_err());
    }

    #[test]
    fn test_event_metadata_builder() {
        let metadata = EventMetadata::new("user-1")
            .with_correlation("corr-123")
            .with_causation("cmd-9");

        assert_eq!(metadata.user_id, "user-1");
        assert_eq!(metadata.correlation_id, "corr-123");
        assert_eq!(metadata.causation_id.as_deref(), Some("cmd-9"));

        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["correlationId"], "corr-123");
        assert_eq!(json["causationId"], "cmd-9");
    }

    #[test]
    fn test_to_new_event_strips_type_tag() {
        let event = DomainEvent::TaskAssigned(TaskAssigned {
            task_id: TaskId::new(),
            description: "index the corpus".to_string(),
        });
        let new_event = event
            .to_new_event(AggregateId::new(), EventMetadata::new("u"))
            .unwrap();

        assert_eq!(new_event.event_type, "TaskAssigned");
        assert_eq!(new_event.aggregate_type, "Agent");
        assert_eq!(new_event.payload["description"], "index the corpus");
        assert!(new_event.payload.get("type").is_none());
    }

    #[test]
    fn test_decode_known_type() {
        let event = stored(
            "AgentCreated",
            json!({ "name": "indexer", "capabilities": ["search"] }),
        );
        let decoded = DomainEvent::decode(&event).unwrap();

        assert_eq!(
            decoded,
            Some(DomainEvent::AgentCreated(AgentCreated {
                name: "indexer".to_string(),
                capabilities: vec!["search".to_string()],
                max_concurrent_tasks: None,
            }))
        );
    }

    #[test]
    fn test_decode_unknown_type_is_none() {
        let event = stored("AgentRenamed", json!({ "name": "x" }));
        assert_eq!(DomainEvent::decode(&event).unwrap(), None);
    }

    #[test]
    fn test_decode_malformed_payload_is_error() {
        let event = stored("TaskAssigned", json!({ "description": 42 }));
        let err = DomainEvent::decode(&event).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DeserializationError);
    }
}
