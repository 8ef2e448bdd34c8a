//! Loads aggregates by replaying their history from an [`EventStore`].

use std::sync::Arc;
use tracing::instrument;

use crate::error::{Result, StrandError};

use super::aggregate::Aggregate;
use super::event::AggregateId;
use super::store::EventStore;

/// Read-side access to aggregates. Cheap to clone.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn EventStore>,
}

impl Repository {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Rehydrate an aggregate. An id with no history yields the empty
    /// aggregate at version 0.
    #[instrument(skip(self), fields(aggregate_type = A::AGGREGATE_TYPE))]
    pub async fn load<A: Aggregate>(&self, aggregate_id: AggregateId) -> Result<A> {
        let history = self.store.get_events(aggregate_id, None).await?;
        let mut aggregate = A::default();
        aggregate.load_from_history(&history)?;
        Ok(aggregate)
    }

    /// Like [`load`](Self::load), but an id with no history is an error.
    pub async fn load_existing<A: Aggregate>(&self, aggregate_id: AggregateId) -> Result<A> {
        let aggregate: A = self.load(aggregate_id).await?;
        if aggregate.version() == 0 {
            return Err(StrandError::aggregate_not_found(A::AGGREGATE_TYPE, aggregate_id));
        }
        Ok(aggregate)
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::events::{
        AgentAggregate, AgentCreated, DomainEvent, EventMetadata, InMemoryEventStore,
    };

    #[tokio::test]
    async fn test_load_replays_history() {
        let store = Arc::new(InMemoryEventStore::new());
        let id = AggregateId::new();
        let created = DomainEvent::AgentCreated(AgentCreated {
            name: "indexer".to_string(),
            capabilities: vec![],
            max_concurrent_tasks: None,
        })
        .to_new_event(id, EventMetadata::new("tester"))
        .unwrap();
        store.append(vec![created], None).await.unwrap();

        let repository = Repository::new(store);
        let agent: AgentAggregate = repository.load(id).await.unwrap();

        assert_eq!(agent.version, 1);
        assert_eq!(agent.name, "indexer");
    }

    #[tokio::test]
    async fn test_load_existing_on_unknown_id() {
        let repository = Repository::new(Arc::new(InMemoryEventStore::new()));

        let fresh: AgentAggregate = repository.load(AggregateId::new()).await.unwrap();
        assert_eq!(fresh.version, 0);

        let err = repository
            .load_existing::<AgentAggregate>(AggregateId::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::AggregateNotFound);
    }
}
