//! Benchmarks for aggregate replay and in-memory appends.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use strand_core::agents::TaskId;
use strand_core::events::{
    Aggregate, AgentAggregate, AgentCreated, AggregateId, DomainEvent, EventMetadata, EventStore,
    InMemoryEventStore, StoredEvent, TaskAssigned, TaskCompleted,
};

fn build_history(tasks: usize) -> Vec<StoredEvent> {
    let id = AggregateId::new();
    let mut events = vec![DomainEvent::AgentCreated(AgentCreated {
        name: "bench".to_string(),
        capabilities: vec!["search".to_string()],
        max_concurrent_tasks: Some(1),
    })];
    for i in 0..tasks {
        let task_id = TaskId::new();
        events.push(DomainEvent::TaskAssigned(TaskAssigned { task_id, description: format!("task-{i}") }));
        events.push(DomainEvent::TaskCompleted(TaskCompleted { task_id, result: json!({ "n": i }) }));
    }
    events
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let n = i as i64 + 1;
            e.to_new_event(id, EventMetadata::new("bench")).unwrap().into_stored(n, n)
        })
        .collect()
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("agent_replay");
    for tasks in [10, 100, 1_000, 10_000] {
        let history = build_history(tasks);
        group.throughput(Throughput::Elements(history.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(history.len()), &history, |b, history| {
            b.iter(|| {
                let mut agent = AgentAggregate::default();
                agent.load_from_history(history).unwrap();
                black_box(agent)
            });
        });
    }
    group.finish();
}

fn bench_memory_append(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("memory_append");
    for batch in [1, 10, 100] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &n| {
            let store = &InMemoryEventStore::new();
            b.to_async(&rt).iter(move || async move {
                let id = AggregateId::new();
                let events = build_history(n / 2)
                    .into_iter()
                    .take(n.max(1))
                    .map(|e| {
                        DomainEvent::decode(&e).unwrap().unwrap().to_new_event(id, EventMetadata::new("bench")).unwrap()
                    })
                    .collect();
                black_box(store.append(events, None).await.unwrap())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_replay, bench_memory_append);
criterion_main!(benches);
