use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tick_relay::clock::ManualClock;
use tick_relay::server::{self, AppState, Connection, PushError, ServerConfig};
use tick_relay::store::{MemoryStore, TickStore};
use tick_relay::tick::TickRecord;
use tokio::runtime::Runtime;

const NOW: i64 = 1_700_000_000;
const VIEWERS: usize = 1_000;

struct NullConnection;

impl Connection for NullConnection {
    fn push(&self, payload: Arc<str>) -> Result<(), PushError> {
        criterion::black_box(payload);
        Ok(())
    }
}

fn bench_broadcast_fan_out(c: &mut Criterion) {
    let rt = Runtime::new().expect("failed to create Tokio runtime");
    let state = rt.block_on(async {
        let clock = Arc::new(ManualClock::new(NOW));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        for (idx, symbol) in ["AAPL", "GOOGL", "MSFT", "AMZN", "FB"].iter().enumerate() {
            store
                .upsert(TickRecord::new(*symbol, 100.0 + idx as f64, NOW).unwrap(), 3600)
                .await
                .unwrap();
        }
        let state = AppState::new(ServerConfig::default(), store, clock);
        for _ in 0..VIEWERS {
            state.registry.register(Arc::new(NullConnection));
        }
        state
    });

    let mut group = c.benchmark_group("broadcast");
    group.throughput(Throughput::Elements((VIEWERS * 5) as u64));
    group.bench_function("tick_1000_viewers_5_rows", |b| {
        b.iter_batched(
            || state.clone(),
            |state| {
                let report = rt
                    .block_on(server::broadcast_tick(&state))
                    .expect("broadcast tick");
                assert_eq!(report.delivered, VIEWERS * 5);
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_broadcast_fan_out);
criterion_main!(benches);
