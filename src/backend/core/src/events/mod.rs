//! Event Sourcing System
//!
//! - **`event`**: identifiers, event envelopes and the Agent domain events.
//! - **`store`**: the `EventStore` contract and append planning.
//! - **`postgres`** / **`memory`**: storage engines.
//! - **`retry`**: bounded retry for reads.
//! - **`aggregate`**: the `Aggregate` trait and replay.
//! - **`repository`**: loading aggregates from a store.

pub mod aggregate;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod retry;
pub mod store;

pub use aggregate::*;
pub use event::*;
pub use memory::InMemoryEventStore;
pub use postgres::PgEventStore;
pub use repository::Repository;
pub use retry::{retry_read, RetryPolicy, Sleeper, TokioSleeper};
pub use store::{plan_append, AppendPlan, EventStore};
