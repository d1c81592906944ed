#![allow(dead_code)]

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use rpckit_protocol::{ErrorCode, WireError};
use rpckit_server::{MethodError, Service, ServiceRegistry};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddArgs {
    pub a: i64,
    pub b: i64,
}

/// Service `test` with a shared invocation counter.
pub fn registry(counter: Arc<AtomicUsize>) -> Arc<ServiceRegistry> {
    let registry = Arc::new(ServiceRegistry::new());
    let cached = counter.clone();
    let flaky = Arc::new(AtomicUsize::new(0));
    registry
        .register(
            Service::builder("test")
                .method("Hello", |_ctx, _: ()| async { Ok("hello") })
                .method("Inc", |_ctx, n: i64| async move { Ok(n + 1) })
                .method("Add", |_ctx, args: AddArgs| async move { Ok(args.a + args.b) })
                .method("CacheTest", move |_ctx, _: String| {
                    let n = cached.fetch_add(1, Ordering::SeqCst) + 1;
                    async move { Ok(n) }
                })
                .method("DefaultNoCache", move |_ctx, _: String| {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    async move { Ok(n) }
                })
                .method("Flaky", move |_ctx, _: ()| {
                    let n = flaky.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n == 1 {
                            let err = WireError::new(ErrorCode(7), "warming up");
                            return Err(MethodError::Rpc(err));
                        }
                        Ok(n)
                    }
                })
                .method("Fail", |_ctx, _: ()| async {
                    Err::<(), _>(MethodError::Rpc(WireError::new(ErrorCode(42), "nope")))
                })
                .method("Slow", |_ctx, _: ()| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }),
        )
        .unwrap();
    registry
}

/// Serves HTTP/1.1 with `handler` on an ephemeral local port.
pub async fn spawn_http<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<Full<Bytes>>, hyper::Error>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = handler.clone();
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(handler))
                    .await;
            });
        }
    });
    addr
}

pub fn reply(status: u16, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .unwrap()
}
