//! Dispatch and fan-out benchmark suite.
//!
//! Benchmarks the in-process message paths:
//! - Registry dispatch of one message to completion
//! - Request/reply through a session over an in-memory pair
//! - Broadcast fan-out to 1, 10 and 100 clients
//!
//! Run with: cargo bench --bench dispatch
//! Results saved to: target/criterion/

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::json;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use hubwire::transport::pair;
use hubwire::{
    ClientSet, ConnectionSession, Epoch, EpochClock, Error, HandlerContext, Message,
    MessageRegistry, RECEIVE_MESSAGE, TransportEvent,
};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const CLIENT_COUNTS: &[usize] = &[1, 10, 100];

fn upper_registry() -> Arc<MessageRegistry> {
    let registry = MessageRegistry::new();
    registry.on(RECEIVE_MESSAGE, |message: String, _ctx| async move {
        Ok::<_, Error>(message.to_uppercase())
    });
    Arc::new(registry)
}

// ============================================================================
// Benchmark: Registry Dispatch
// ============================================================================

fn bench_registry_dispatch(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let registry = upper_registry();
    let token = CancellationToken::new();

    c.bench_function("registry_dispatch", |b| {
        b.to_async(&rt).iter(|| {
            let registry = Arc::clone(&registry);
            let ctx = HandlerContext::new(RECEIVE_MESSAGE, Epoch::new(1), token.clone());
            async move {
                registry
                    .dispatch(RECEIVE_MESSAGE, json!("hello"), ctx)
                    .expect("registered")
                    .outcome()
                    .await
                    .expect("handler")
            }
        });
    });
}

// ============================================================================
// Benchmark: Session Round Trip
// ============================================================================

fn bench_session_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let (mut peer, shutdown) = rt.block_on(async {
        let (local, remote) = pair();
        let clock = EpochClock::new();
        clock.advance();

        let shutdown = CancellationToken::new();
        let session = ConnectionSession::new(local, upper_registry(), clock, shutdown.clone());
        tokio::spawn(session.run());
        (remote, shutdown)
    });

    c.bench_function("session_round_trip", |b| {
        b.iter(|| {
            rt.block_on(async {
                peer.send(Message::receive_message("hello"))
                    .await
                    .expect("send");
                match peer.recv().await {
                    TransportEvent::Message(reply) => reply,
                    TransportEvent::Closed(reason) => panic!("closed: {reason}"),
                }
            })
        });
    });

    shutdown.cancel();
}

// ============================================================================
// Benchmark: Broadcast Fan-out
// ============================================================================

fn bench_fan_out(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let mut group = c.benchmark_group("fan_out");

    for &count in CLIENT_COUNTS {
        let (clients, locals) = rt.block_on(async {
            let clients = ClientSet::new();
            let mut locals = Vec::with_capacity(count);
            for _ in 0..count {
                let (local, mut remote) = pair();
                clients.insert(local.handle());
                locals.push(local);

                // Drain so pushed messages do not pile up
                tokio::spawn(async move {
                    while let TransportEvent::Message(_) = remote.recv().await {}
                });
            }
            (clients, locals)
        });

        let message = Message::receive_message("tick");

        group.bench_with_input(BenchmarkId::new("send_all", count), &count, |b, _| {
            b.to_async(&rt).iter(|| clients.send_all(&message));
        });

        for local in locals {
            local.close();
        }
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_registry_dispatch,
    bench_session_round_trip,
    bench_fan_out
);
criterion_main!(benches);
