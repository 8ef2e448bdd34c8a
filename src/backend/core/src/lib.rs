#![allow(clippy::result_large_err)]
//! # Strand Core
//!
//! An append-only event log with optimistic concurrency, and the machinery to
//! rebuild aggregates from it and drive commands through it.
//!
//! ## Architecture
//!
//! - **Events**: the `EventStore` contract with Postgres and in-memory engines,
//!   aggregate replay, and bounded retry for reads
//! - **Commands**: load, validate, emit, append with the version that was read
//! - **Agents**: the agent identifiers and status model the domain events use
//! - **Db**: connection pool, embedded migrations, connectivity checks
//! - **Telemetry**: structured logging setup
//! - **Error**: one error type, classified as concurrency, validation or storage

pub mod agents;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod telemetry;

pub use error::{
    ErrorClass, ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, StrandError,
};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::agents::{AgentStatus, TaskId};
    pub use crate::commands::{
        AgentCommand, AgentCommandHandler, Command, CommandMetadata, CommandOutcome,
    };
    pub use crate::config::{Config, DatabaseConfig, StoreConfig};
    pub use crate::db::Database;
    pub use crate::error::{
        ErrorClass, ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, StrandError,
    };
    pub use crate::events::{
        Aggregate, AgentAggregate, AggregateId, DomainEvent, EventId, EventMetadata,
        EventStore, InMemoryEventStore, NewEvent, PgEventStore, Position, Repository,
        RetryPolicy, Sleeper, StoredEvent, TokioSleeper, Version,
    };
}
