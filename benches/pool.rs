use clientnet::crypto::verify::wildcard_match;
use clientnet::reactor::runtime::TokioReactor;
use clientnet::reactor::Reactor;
use clientnet::socket::connect::{Connector, TcpConnector};
use clientnet::socket::pool::SocketPool;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

/// Pure in-memory pool and matcher operations; no network I/O.
fn benchmark_pool_operations(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let _guard = runtime.enter();
    let reactor: Arc<dyn Reactor> = Arc::new(TokioReactor::new());
    let connector: Arc<dyn Connector> = Arc::new(TcpConnector::new());

    c.bench_function("pool_new", |b| {
        b.iter(|| black_box(SocketPool::new(reactor.clone(), connector.clone())))
    });

    let pool = SocketPool::new(reactor.clone(), connector.clone());
    c.bench_function("pool_stats", |b| {
        b.iter(|| {
            black_box(pool.idle_count());
            black_box(pool.slot_count("example.com:443"));
            black_box(pool.pending_connect_count("example.com:443"));
            black_box(pool.queued_waiter_count("example.com:443"));
        })
    });

    c.bench_function("wildcard_match", |b| {
        b.iter(|| black_box(wildcard_match("*.example.com", "api.example.com")))
    });
}

criterion_group!(benches, benchmark_pool_operations);
criterion_main!(benches);
