//! End-to-end client-server benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::future::join_all;
use rpckit_client::{Client, Operation, RemoteFn};
use rpckit_server::{builtin, Config, RpcServer, Service, ServiceRegistry};
use rpckit_transport::{dial, Connection, ConnectionOptions, Context, Listener, PipeListener, TcpDialer};
use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

struct TestSetup {
    _shutdown: tokio_util::sync::DropGuard,
    conn: Arc<Connection>,
}

fn registry() -> Arc<ServiceRegistry> {
    let registry = Arc::new(ServiceRegistry::new());
    builtin::register(&registry).unwrap();
    registry
        .register(Service::builder("bench").method("echo", |_ctx, v: Value| async move { Ok(v) }))
        .unwrap();
    registry
}

fn setup_pipe(rt: &Runtime) -> TestSetup {
    let server = Arc::new(RpcServer::new(Config::default(), registry()));
    let listener = Arc::new(PipeListener::new());
    let dialer = listener.dialer();
    let shutdown = CancellationToken::new();

    {
        let server = server.clone();
        let shutdown = shutdown.clone();
        rt.spawn(async move {
            let _ = server.run_on(listener, shutdown).await;
        });
    }

    let conn = rt.block_on(async {
        dial(&Context::background(), dialer.as_ref(), &ConnectionOptions::new())
            .await
            .unwrap()
    });

    TestSetup {
        _shutdown: shutdown.drop_guard(),
        conn,
    }
}

fn setup_tcp(rt: &Runtime) -> TestSetup {
    // Find available port
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = Config::default();
    config.network.bind_addr = addr;
    let server = Arc::new(RpcServer::new(config, registry()));
    let shutdown = CancellationToken::new();

    {
        let server = server.clone();
        let shutdown = shutdown.clone();
        rt.spawn(async move {
            let _ = server.run(shutdown).await;
        });
    }

    // Give server time to start
    std::thread::sleep(std::time::Duration::from_millis(100));

    let conn = rt.block_on(async {
        dial(
            &Context::background(),
            &TcpDialer::new(addr),
            &ConnectionOptions::new(),
        )
        .await
        .unwrap()
    });

    TestSetup {
        _shutdown: shutdown.drop_guard(),
        conn,
    }
}

fn bench_ping_latency(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("e2e_ping");
    group.throughput(Throughput::Elements(1));

    for (name, setup) in [("pipe", setup_pipe(&rt)), ("tcp", setup_tcp(&rt))] {
        group.bench_function(name, |b| {
            b.to_async(&rt).iter(|| async {
                let ctx = Context::background();
                let pong: String = setup.conn.request(&ctx, "rpc.ping", None).await.unwrap();
                black_box(pong)
            });
        });
    }

    group.finish();
}

fn bench_bound_call(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_pipe(&rt);
    let client = Client::builder("bench")
        .connection(setup.conn.clone())
        .namespace("bench", ".")
        .build()
        .unwrap();
    let echo: RemoteFn<(Value,), Value> = client.bind(Operation::new("echo")).unwrap();
    let cached: RemoteFn<(Value,), Value> = client
        .bind(Operation::new("echo").cache("key:cached,ttl:1h"))
        .unwrap();

    let mut group = c.benchmark_group("e2e_bound_call");
    group.throughput(Throughput::Elements(1));

    group.bench_function("uncached", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(echo.call((Value::from(42),)).await.unwrap()) });
    });
    group.bench_function("cached", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(cached.call((Value::from(42),)).await.unwrap()) });
    });

    group.finish();
}

fn bench_concurrent_calls(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_pipe(&rt);

    let mut group = c.benchmark_group("e2e_concurrent");

    for concurrency in [1, 10, 100] {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&rt).iter(|| async {
                    let ctx = Context::background();
                    let calls = (0..concurrency).map(|i| {
                        let conn = setup.conn.clone();
                        let ctx = ctx.clone();
                        async move {
                            let params = rpckit_protocol::Params::Array(vec![Value::from(i)]);
                            conn.request::<Value>(&ctx, "bench.echo", Some(params))
                                .await
                                .unwrap()
                        }
                    });
                    black_box(join_all(calls).await)
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_ping_latency,
    bench_bound_call,
    bench_concurrent_calls,
);

criterion_main!(benches);
