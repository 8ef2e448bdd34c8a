//! Runs agent commands against an event store.

use metrics::counter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, Span};

use crate::error::{ErrorClass, Result, StrandError};
use crate::events::{Aggregate, AgentAggregate, AggregateId, EventStore, Repository};

use super::agent::decide;
use super::{Command, CommandOutcome};

/// Load, validate, emit, append.
///
/// Each command reads the aggregate's history and appends with the version it
/// saw. A concurrent writer that got there first turns into a
/// `ConcurrencyConflict`, which is returned as-is: the caller decides whether
/// to reload and resubmit.
#[derive(Clone)]
pub struct AgentCommandHandler {
    repository: Repository,
}

impl AgentCommandHandler {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            repository: Repository::new(store),
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// Handle one command.
    #[instrument(
        skip(self, command),
        fields(
            command = command.kind.command_type(),
            correlation_id = %command.metadata.correlation_id,
            aggregate_id = tracing::field::Empty,
        )
    )]
    pub async fn handle(&self, command: Command) -> Result<CommandOutcome> {
        let command_type = command.kind.command_type();
        let result = self.execute(command).await;
        record_outcome(command_type, &result);
        result
    }

    /// Like [`handle`](Self::handle), but gives up when `token` is cancelled.
    ///
    /// Cancellation is checked first. Once the append has been sent, a
    /// cancellation can still lose the race with the commit, so a
    /// `Cancelled` error does not prove that nothing was written.
    pub async fn handle_with_cancel(
        &self,
        command: Command,
        token: &CancellationToken,
    ) -> Result<CommandOutcome> {
        let command_type = command.kind.command_type();
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                let err = StrandError::cancelled(command_type);
                counter!(
                    "strand_commands_total",
                    "command" => command_type,
                    "outcome" => "cancelled"
                )
                .increment(1);
                err.log();
                Err(err)
            }
            result = self.handle(command) => result,
        }
    }

    async fn execute(&self, command: Command) -> Result<CommandOutcome> {
        let Command { kind, metadata } = command;

        let aggregate_id = match metadata.aggregate_id {
            Some(id) => id,
            None if kind.is_creation() => AggregateId::new(),
            None => {
                return Err(StrandError::invalid_input(format!(
                    "{} requires an aggregate id",
                    kind.command_type()
                )))
            }
        };
        Span::current().record("aggregate_id", tracing::field::display(aggregate_id));

        let mut agent: AgentAggregate = self.repository.load(aggregate_id).await?;
        if agent.id().is_none() {
            agent.set_id(aggregate_id);
        }

        let decided = decide(&agent, &kind)?;
        if decided.is_empty() {
            return Ok(CommandOutcome {
                aggregate_id,
                version: agent.version,
                events: Vec::new(),
            });
        }

        let event_metadata = metadata.event_metadata();
        let events = decided
            .iter()
            .map(|event| event.to_new_event(aggregate_id, event_metadata.clone()))
            .collect::<Result<Vec<_>>>()?;

        let stored = self
            .repository
            .store()
            .append(events, Some(agent.version))
            .await?;

        let version = stored.last().map_or(agent.version, |event| event.version);
        Ok(CommandOutcome {
            aggregate_id,
            version,
            events: stored,
        })
    }
}

fn record_outcome(command_type: &'static str, result: &Result<CommandOutcome>) {
    let outcome = match result {
        Ok(_) => "accepted",
        Err(e) => match e.class() {
            ErrorClass::Concurrency => "conflict",
            ErrorClass::Validation => "rejected",
            ErrorClass::Storage => "storage_error",
            ErrorClass::Internal => "error",
        },
    };
    counter!(
        "strand_commands_total",
        "command" => command_type,
        "outcome" => outcome
    )
    .increment(1);

    match result {
        Ok(outcome) => info!(
            aggregate_id = %outcome.aggregate_id,
            version = outcome.version,
            events = outcome.events.len(),
            "Command accepted"
        ),
        // The engine has already logged storage failures.
        Err(e) if e.is_storage() => {}
        Err(e) => e.log(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentStatus, TaskId};
    use crate::commands::{AgentCommand, CommandMetadata};
    use crate::error::ErrorCode;
    use crate::events::{InMemoryEventStore, RetryPolicy, Sleeper};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tracing::Level;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::{Layer, Registry};

    /// Counts ERROR-level events while installed.
    #[derive(Clone, Default)]
    struct ErrorCounter(Arc<AtomicUsize>);

    impl ErrorCounter {
        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for ErrorCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Returns immediately.
    struct NoPause;

    #[async_trait]
    impl Sleeper for NoPause {
        async fn sleep(&self, _duration: Duration) {}
    }

    /// Holds a retry open far longer than any test waits.
    struct LongPause;

    #[async_trait]
    impl Sleeper for LongPause {
        async fn sleep(&self, _duration: Duration) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }

    fn handler() -> (Arc<InMemoryEventStore>, AgentCommandHandler) {
        let store = Arc::new(InMemoryEventStore::new());
        let handler = AgentCommandHandler::new(store.clone());
        (store, handler)
    }

    fn create_command() -> Command {
        Command::new(
            AgentCommand::CreateAgent {
                name: "crawler".to_string(),
                capabilities: vec!["http".to_string()],
                max_concurrent_tasks: Some(1),
            },
            CommandMetadata::new("ops").with_correlation("corr-42"),
        )
    }

    fn on(id: AggregateId, kind: AgentCommand) -> Command {
        Command::new(kind, CommandMetadata::new("ops").for_aggregate(id))
    }

    #[tokio::test]
    async fn test_create_assigns_fresh_id() {
        let (store, handler) = handler();

        let outcome = handler.handle(create_command()).await.unwrap();

        assert_eq!(outcome.version, 1);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].event_type, "AgentCreated");
        assert_eq!(outcome.events[0].metadata.correlation_id, "corr-42");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_pipeline_advances_version() {
        let (_store, handler) = handler();
        let id = handler.handle(create_command()).await.unwrap().aggregate_id;

        let outcome = handler
            .handle(on(
                id,
                AgentCommand::AssignTask {
                    task_id: TaskId::new(),
                    description: "crawl".to_string(),
                },
            ))
            .await
            .unwrap();
        assert_eq!(outcome.version, 2);

        let agent: AgentAggregate = handler.repository().load(id).await.unwrap();
        assert_eq!(agent.status, Some(AgentStatus::Busy));
    }

    #[tokio::test]
    async fn test_rejected_command_writes_nothing() {
        let (store, handler) = handler();
        let id = AggregateId::new();

        let err = handler
            .handle(on(id, AgentCommand::Decommission { reason: None }))
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::AggregateNotFound);
        assert_eq!(err.details().aggregate_id.as_deref(), Some(id.to_string().as_str()));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_id_for_non_creation() {
        let (_store, handler) = handler();
        let command = Command::new(
            AgentCommand::Decommission { reason: None },
            CommandMetadata::new("ops"),
        );

        let err = handler.handle(command).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_noop_command_returns_current_version() {
        let (store, handler) = handler();
        let id = handler.handle(create_command()).await.unwrap().aggregate_id;

        let outcome = handler
            .handle(on(
                id,
                AgentCommand::ChangeStatus {
                    status: AgentStatus::Idle,
                    reason: None,
                },
            ))
            .await
            .unwrap();

        assert_eq!(outcome.version, 1);
        assert!(outcome.events.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_storage_failure_on_append_is_not_retried() {
        let (store, handler) = handler();
        store.fail_next_appends(1);

        let err = handler.handle(create_command()).await.unwrap_err();

        assert!(err.is_storage());
        assert!(store.is_empty());
        // The injected failure was consumed by the single attempt.
        handler.handle(create_command()).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (store, handler) = handler();
        let token = CancellationToken::new();
        token.cancel();

        let err = handler
            .handle_with_cancel(create_command(), &token)
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::Cancelled);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_uncancelled_token_runs_command() {
        let (_store, handler) = handler();
        let token = CancellationToken::new();

        let outcome = handler
            .handle_with_cancel(create_command(), &token)
            .await
            .unwrap();
        assert_eq!(outcome.version, 1);
    }

    #[tokio::test]
    async fn test_cancel_during_read_retry_returns_promptly() {
        let store = Arc::new(InMemoryEventStore::new().with_sleeper(Arc::new(LongPause)));
        let handler = AgentCommandHandler::new(store.clone());
        store.fail_next_reads(1);

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let err = handler
            .handle_with_cancel(create_command(), &token)
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_append_storage_failure_logged_once() {
        let errors = ErrorCounter::default();
        let _guard = tracing::subscriber::set_default(Registry::default().with(errors.clone()));

        let (store, handler) = handler();
        store.fail_next_appends(1);

        let err = handler.handle(create_command()).await.unwrap_err();

        assert!(err.is_storage());
        assert_eq!(errors.count(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_read_failure_logged_once() {
        let errors = ErrorCounter::default();
        let _guard = tracing::subscriber::set_default(Registry::default().with(errors.clone()));

        let store = Arc::new(
            InMemoryEventStore::new()
                .with_sleeper(Arc::new(NoPause))
                .with_retry_policy(RetryPolicy::default().with_max_attempts(3)),
        );
        let handler = AgentCommandHandler::new(store.clone());
        store.fail_next_reads(3);

        let err = handler.handle(create_command()).await.unwrap_err();

        assert!(err.is_storage());
        assert_eq!(errors.count(), 1);
    }
}
