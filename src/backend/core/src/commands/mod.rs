//! Command handling pipeline.
//!
//! A command is resolved to an aggregate, the aggregate is rehydrated from the
//! log, the command is validated against that state, and the resulting events
//! are appended with the rehydrated version as the expected version.
//!
//! - **`agent`**: Agent commands and the pure decision function.
//! - **`handler`**: `AgentCommandHandler`, which runs the pipeline.

pub mod agent;
pub mod handler;

pub use agent::{decide, AgentCommand};
pub use handler::AgentCommandHandler;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::{AggregateId, EventMetadata, StoredEvent, Version};

/// Audit and routing context supplied with every command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMetadata {
    /// Target aggregate. Creation commands may leave this empty to get a fresh id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_id: Option<AggregateId>,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
}

impl CommandMetadata {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            aggregate_id: None,
            user_id: user_id.into(),
            timestamp: Utc::now(),
            correlation_id: Uuid::new_v4().to_string(),
            causation_id: None,
        }
    }

    pub fn for_aggregate(mut self, aggregate_id: AggregateId) -> Self {
        self.aggregate_id = Some(aggregate_id);
        self
    }

    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    pub fn with_causation(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Metadata for the events this command produces.
    pub fn event_metadata(&self) -> EventMetadata {
        EventMetadata {
            user_id: self.user_id.clone(),
            timestamp: self.timestamp,
            correlation_id: self.correlation_id.clone(),
            causation_id: self.causation_id.clone(),
        }
    }
}

/// A request to change one aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "command")]
    pub kind: AgentCommand,
    pub metadata: CommandMetadata,
}

impl Command {
    pub fn new(kind: AgentCommand, metadata: CommandMetadata) -> Self {
        Self { kind, metadata }
    }
}

/// Result of a handled command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub aggregate_id: AggregateId,
    /// Aggregate version after the command; unchanged if no events were produced.
    pub version: Version,
    /// The committed events, empty when the command was a no-op.
    pub events: Vec<StoredEvent>,
}
