use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use chrono::Utc;
use eventhub_core::{ManualClock, SystemClock};
use eventhub_events::{EventCategory, EventSource, NewEvent, StreamId};
use eventhub_infra::config::PipelineConfig;
use eventhub_infra::ledger::{EventLedger, InMemoryLedger};
use eventhub_infra::projections::{InMemoryProjectionStore, ProjectionEngine};
use eventhub_infra::service::EventServiceBuilder;
use serde_json::json;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn order_event(entity_id: &str, i: usize) -> NewEvent {
    NewEvent::new(
        "order.updated",
        EventSource::Service,
        EventCategory::Domain,
        json!({ "line": i, "total": i * 10 }),
    )
    .with_entity("order", entity_id)
}

fn bench_ledger_append_throughput(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("ledger_append_throughput");

    for batch_size in [1usize, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("append", batch_size),
            batch_size,
            |b, &size| {
                let ledger = InMemoryLedger::new();
                b.iter(|| {
                    rt.block_on(async {
                        for i in 0..size {
                            black_box(ledger.append(order_event("o1", i)).await.unwrap());
                        }
                    })
                });
            },
        );
    }

    group.finish();
}

fn bench_pipeline_cycle(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("pipeline_cycle");
    group.sample_size(20);

    for batch_size in [10usize, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("ingest_and_drain", batch_size),
            batch_size,
            |b, &size| {
                b.iter(|| {
                    rt.block_on(async {
                        let svc = EventServiceBuilder::in_memory(Arc::new(SystemClock))
                            .with_pipeline(PipelineConfig::default().with_batch_size(size))
                            .build()
                            .await
                            .unwrap();
                        for i in 0..size {
                            svc.create(order_event(&format!("o{}", i % 16), i))
                                .await
                                .unwrap();
                        }
                        black_box(svc.run_pipeline_cycle().await.unwrap());
                    })
                });
            },
        );
    }

    group.finish();
}

fn bench_projection_rebuild_speed(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("projection_rebuild_speed");

    for event_count in [10usize, 100, 1000, 10000].iter() {
        group.bench_with_input(
            BenchmarkId::new("rebuild_from_stream", event_count),
            event_count,
            |b, &count| {
                let clock = Arc::new(ManualClock::new(Utc::now()));
                let ledger = InMemoryLedger::with_clock(clock.clone());
                let stream_id = StreamId::new("order", "o1");
                let events = rt.block_on(async {
                    for i in 0..count {
                        ledger.append(order_event("o1", i)).await.unwrap();
                    }
                    ledger.load_stream(&stream_id).await.unwrap()
                });
                let engine = ProjectionEngine::with_default_folds(
                    Arc::new(InMemoryProjectionStore::new()),
                    clock,
                );

                b.iter(|| {
                    rt.block_on(async {
                        black_box(engine.rebuild(&stream_id, black_box(&events)).await.unwrap());
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_ledger_append_throughput,
    bench_pipeline_cycle,
    bench_projection_rebuild_speed
);
criterion_main!(benches);
