//! Bound methods over an rpckit connection.

mod common;

use common::AddArgs;
use rpckit_client::{
    rpc_client, CallError, Client, ClientConfig, NamingConvention, Operation, RemoteError,
};
use rpckit_protocol::ErrorCode;
use rpckit_transport::{
    dial, serve, Connection, ConnectionOptions, Context, ContextError, Listener, PipeListener,
    Server,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

rpc_client! {
    struct Svc {
        hello: fn() -> String = Operation::new("Hello"),
        inc: fn(i64) -> i64 = Operation::new("Inc"),
        add: fn(AddArgs) -> i64 = Operation::new("Add").container("object"),
        cache_test: fn(String) -> usize = Operation::new("CacheTest").cache("ttl:300ms"),
        default_no_cache: fn(String) -> usize = Operation::new("DefaultNoCache"),
        flaky: fn() -> usize = Operation::new("Flaky").cache("ttl:10s"),
        fail: fn() -> () = Operation::new("Fail"),
        slow: fn() -> () = Operation::new("Slow"),
        missing: fn() -> () = Operation::new("Missing"),
    }
}

async fn connect(counter: Arc<AtomicUsize>) -> (Server, Arc<Connection>) {
    let listener = Arc::new(PipeListener::new());
    let dialer = listener.dialer();
    let options = ConnectionOptions::new().with_handler(common::registry(counter));
    let server = serve(listener, Arc::new(options));
    let conn = dial(
        &Context::background(),
        dialer.as_ref(),
        &ConnectionOptions::new(),
    )
    .await
    .unwrap();
    (server, conn)
}

fn client(conn: Arc<Connection>, config: ClientConfig) -> Client {
    Client::builder("test")
        .connection(conn)
        .namespace("test", ".")
        .config(config)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_calls() {
    let (server, conn) = connect(Arc::default()).await;
    let svc = Svc::bind(&client(conn, ClientConfig::default())).unwrap();

    assert_eq!(svc.hello.call(()).await.unwrap(), "hello");
    assert_eq!(svc.inc.call((1,)).await.unwrap(), 2);
    assert_eq!(svc.add.call((AddArgs { a: 2, b: 3 },)).await.unwrap(), 5);

    server.shutdown();
}

#[tokio::test]
async fn test_cache() {
    let counter = Arc::new(AtomicUsize::new(0));
    let (server, conn) = connect(counter.clone()).await;
    let svc = Svc::bind(&client(conn, ClientConfig::default())).unwrap();

    for i in 0..10 {
        assert_eq!(svc.cache_test.call((i.to_string(),)).await.unwrap(), 1);
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(svc.cache_test.call(("10".to_string(),)).await.unwrap(), 2);

    for i in 0..10 {
        let n = svc.default_no_cache.call((i.to_string(),)).await.unwrap();
        assert_eq!(n, 3 + i);
    }
    assert_eq!(counter.load(Ordering::SeqCst), 12);

    server.shutdown();
}

#[tokio::test]
async fn test_failed_call_not_cached() {
    let (server, conn) = connect(Arc::default()).await;
    let svc = Svc::bind(&client(conn, ClientConfig::default())).unwrap();

    let err = svc.flaky.call(()).await.unwrap_err();
    assert_eq!(err.wire_error().unwrap().code, ErrorCode(7));

    // The error was not cached, so the server sees the second call.
    assert_eq!(svc.flaky.call(()).await.unwrap(), 2);
    assert_eq!(svc.flaky.call(()).await.unwrap(), 2);

    server.shutdown();
}

#[tokio::test]
async fn test_server_errors() {
    let (server, conn) = connect(Arc::default()).await;
    let svc = Svc::bind(&client(conn, ClientConfig::default())).unwrap();

    let err = svc.fail.call(()).await.unwrap_err();
    let wire = err.wire_error().unwrap();
    assert_eq!(wire.code, ErrorCode(42));
    assert_eq!(wire.message, "nope");

    let err = svc.missing.call(()).await.unwrap_err();
    assert!(matches!(
        err,
        CallError::Server(RemoteError::Rpc(ref e)) if e.code == ErrorCode::METHOD_NOT_FOUND
    ));

    server.shutdown();
}

#[tokio::test]
async fn test_cancelled_context_never_sent() {
    let counter = Arc::new(AtomicUsize::new(0));
    let (server, conn) = connect(counter.clone()).await;
    let svc = Svc::bind(&client(conn.clone(), ClientConfig::default())).unwrap();

    let ctx = Context::background();
    ctx.cancel();
    let err = svc
        .default_no_cache
        .call_with(&ctx, ("x".to_string(),))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::Context(ContextError::Cancelled)));

    // The next call is the first one the server sees.
    assert_eq!(svc.default_no_cache.call(("y".into(),)).await.unwrap(), 1);
    assert_eq!(conn.pending_count(), 0);

    server.shutdown();
}

#[tokio::test]
async fn test_request_timeout() {
    let (server, conn) = connect(Arc::default()).await;
    let config = ClientConfig::new().with_request_timeout(Duration::from_millis(100));
    let svc = Svc::bind(&client(conn.clone(), config)).unwrap();

    let err = svc.slow.call(()).await.unwrap_err();
    assert!(matches!(err, CallError::Context(ContextError::DeadlineExceeded)));
    assert_eq!(conn.pending_count(), 0);

    // The connection is still usable.
    assert_eq!(svc.inc.call((41,)).await.unwrap(), 42);

    server.shutdown();
}

#[tokio::test]
async fn test_naming_convention_reaches_default_service() {
    let (server, conn) = connect(Arc::default()).await;
    let client = Client::builder("test")
        .connection(conn)
        .naming(NamingConvention::CamelCase)
        .build()
        .unwrap();

    // An explicit name is sent as given.
    let ping = client
        .bind::<(), String>(Operation::new("Ping").name("test.hello"))
        .unwrap();
    assert_eq!(ping.call(()).await.unwrap(), "hello");

    let missing = client.bind::<(), ()>(Operation::new("GetHeight")).unwrap();
    assert_eq!(missing.descriptor().name, "getHeight");
    assert!(missing.call(()).await.is_err());

    server.shutdown();
}

#[tokio::test]
async fn test_concurrent_calls() {
    let (server, conn) = connect(Arc::default()).await;
    let svc = Svc::bind(&client(conn, ClientConfig::default())).unwrap();

    let tasks: Vec<_> = (0..32i64)
        .map(|i| {
            let inc = svc.inc.clone();
            tokio::spawn(async move { (i, inc.call((i,)).await) })
        })
        .collect();
    for task in tasks {
        let (i, result) = task.await.unwrap();
        assert_eq!(result.unwrap(), i + 1);
    }

    server.shutdown();
}
