//! JSON-RPC connection.
//!
//! A [`Connection`] owns one framed byte stream. A single read loop decodes
//! inbound messages: responses complete the matching pending call, requests
//! are handed to the configured [`Handler`] on their own task so that a
//! handler may itself call back into the peer.

use crate::context::Context;
use crate::error::{HandlerError, TransportError};
use async_trait::async_trait;
use bytes::BytesMut;
use futures::FutureExt;
use parking_lot::Mutex;
use rpckit_protocol::{
    Decoder, ErrorCode, Framer, Id, Message, Params, ProtocolError, RawFramer, Request, Response,
    WireError,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// How long teardown waits to shut down the write half.
const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Handles requests sent by the peer.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Produces the result for `request`.
    ///
    /// `ctx` is cancelled when the connection closes. The return value is
    /// discarded for notifications.
    async fn handle(
        &self,
        conn: Arc<Connection>,
        ctx: Context,
        request: Request,
    ) -> Result<Value, HandlerError>;
}

/// Produces per-connection options; called once for every new connection.
pub trait Binder: Send + Sync {
    fn bind(&self) -> ConnectionOptions;
}

/// Per-connection settings.
#[derive(Clone)]
pub struct ConnectionOptions {
    /// Framing used on the stream.
    pub framer: Arc<dyn Framer>,
    /// Handler for inbound requests. Without one every inbound call is
    /// answered with "method not found".
    pub handler: Option<Arc<dyn Handler>>,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self {
            framer: Arc::new(RawFramer),
            handler: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_framer(mut self, framer: Arc<dyn Framer>) -> Self {
        self.framer = framer;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("framer", &self.framer.name())
            .field("handler", &self.handler.is_some())
            .field("read_buffer_size", &self.read_buffer_size)
            .finish()
    }
}

impl Binder for ConnectionOptions {
    fn bind(&self) -> ConnectionOptions {
        self.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Open,
            1 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

type Completion = oneshot::Sender<Result<Response, TransportError>>;

struct PendingCall {
    method: String,
    tx: Completion,
}

type PendingMap = Arc<Mutex<HashMap<Id, PendingCall>>>;

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct Connection {
    writer: tokio::sync::Mutex<BoxWriter>,
    framer: Arc<dyn Framer>,
    handler: Option<Arc<dyn Handler>>,
    pending: PendingMap,
    next_id: AtomicI64,
    state: AtomicU8,
    /// Cancelled when close is requested.
    shutdown: CancellationToken,
    /// Cancelled when the read loop has exited.
    finished: CancellationToken,
}

impl Connection {
    /// Wraps `stream` and starts the read loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<S>(stream: S, options: ConnectionOptions) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let conn = Arc::new(Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            framer: options.framer,
            handler: options.handler,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicI64::new(1),
            state: AtomicU8::new(ConnectionState::Open as u8),
            shutdown: CancellationToken::new(),
            finished: CancellationToken::new(),
        });

        tracing::debug!("Connection opened (framer={})", conn.framer.name());
        tokio::spawn(conn.clone().read_loop(reader, options.read_buffer_size));
        conn
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Number of outbound calls still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Sends a request and returns a handle to await its response.
    ///
    /// Nothing is written when `ctx` is already done; the returned call then
    /// fails with the context error.
    pub async fn call(&self, ctx: &Context, method: &str, params: Option<Params>) -> AsyncCall {
        let id = Id::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let outcome = self.start_call(ctx, id.clone(), method, params).await;
        AsyncCall {
            id,
            outcome: Some(outcome),
            pending: self.pending.clone(),
        }
    }

    async fn start_call(
        &self,
        ctx: &Context,
        id: Id,
        method: &str,
        params: Option<Params>,
    ) -> Result<oneshot::Receiver<Result<Response, TransportError>>, TransportError> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        if self.state() != ConnectionState::Open {
            return Err(TransportError::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            id.clone(),
            PendingCall {
                method: method.to_string(),
                tx,
            },
        );

        // Close may have drained the pending set between the check and the insert.
        if self.state() != ConnectionState::Open {
            self.pending.lock().remove(&id);
            return Err(TransportError::ConnectionClosed);
        }

        let request = Request {
            id: Some(id.clone()),
            method: method.to_string(),
            params,
        };
        tracing::debug!("Sending request id={} method={}", id, method);
        if let Err(e) = self.write(Some(ctx), &request.into()).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }
        Ok(rx)
    }

    /// Calls `method` and decodes the result into `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        method: &str,
        params: Option<Params>,
    ) -> Result<T, TransportError> {
        self.call(ctx, method, params).await.wait(ctx).await
    }

    /// Sends a notification; no response is expected.
    pub async fn notify(
        &self,
        ctx: &Context,
        method: &str,
        params: Option<Params>,
    ) -> Result<(), TransportError> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        if self.state() != ConnectionState::Open {
            return Err(TransportError::ConnectionClosed);
        }
        let request = Request {
            id: None,
            method: method.to_string(),
            params,
        };
        tracing::debug!("Sending notification method={}", method);
        self.write(Some(ctx), &request.into()).await
    }

    /// Starts closing the connection. Pending calls fail with
    /// [`TransportError::ConnectionClosed`]. Calling this more than once has
    /// no further effect.
    pub fn close(&self) {
        if self
            .state
            .compare_exchange(
                ConnectionState::Open as u8,
                ConnectionState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            tracing::debug!("Closing connection");
            self.shutdown.cancel();
            self.fail_pending();
        }
    }

    /// Waits until the read loop has exited and the connection is closed.
    pub async fn closed(&self) {
        self.finished.cancelled().await;
    }

    /// Writes one frame. Waiting for the writer and the write itself both
    /// give up when the connection closes or `ctx` is done.
    async fn write(&self, ctx: Option<&Context>, msg: &Message) -> Result<(), TransportError> {
        let mut buf = BytesMut::new();
        self.framer.encode(msg, &mut buf)?;

        let caller_done = async {
            match ctx {
                Some(ctx) => ctx.done().await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(caller_done);

        let mut writer = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(TransportError::ConnectionClosed),
            err = &mut caller_done => return Err(err.into()),
            writer = self.writer.lock() => writer,
        };

        let written = async {
            match writer.write_all(&buf).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };
        tokio::select! {
            biased;
            result = written => Ok(result?),
            _ = self.shutdown.cancelled() => Err(TransportError::ConnectionClosed),
            err = &mut caller_done => {
                // The frame is truncated on the wire; the stream is unusable.
                tracing::warn!("Write abandoned mid-frame ({}), closing connection", err);
                self.close();
                Err(err.into())
            }
        }
    }

    async fn reply(&self, response: Response) {
        if self.state() != ConnectionState::Open {
            tracing::debug!("Dropping response id={:?}, connection closing", response.id);
            return;
        }
        if let Err(e) = self.write(None, &response.into()).await {
            tracing::warn!("Failed to send response: {}", e);
        }
    }

    fn fail_pending(&self) {
        let drained: Vec<(Id, PendingCall)> = self.pending.lock().drain().collect();
        for (id, call) in drained {
            tracing::debug!("Failing pending call id={} method={}", id, call.method);
            let _ = call.tx.send(Err(TransportError::ConnectionClosed));
        }
    }

    async fn read_loop<R>(self: Arc<Self>, mut reader: R, read_buffer_size: usize)
    where
        R: AsyncRead + Unpin,
    {
        let mut decoder = Decoder::with_capacity(self.framer.clone(), read_buffer_size);
        let mut buf = vec![0u8; read_buffer_size];

        'outer: loop {
            loop {
                match decoder.decode_message() {
                    Ok(Some((msg, n))) => {
                        tracing::debug!("Decoded message ({} bytes)", n);
                        self.dispatch(msg);
                    }
                    Ok(None) => break,
                    Err(e @ ProtocolError::MessageTooLarge { .. }) => {
                        tracing::warn!("Closing connection: {}", e);
                        break 'outer;
                    }
                    Err(e) => {
                        tracing::warn!("Discarding malformed message: {}", e);
                    }
                }
            }

            let read = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                read = reader.read(&mut buf) => read,
            };

            match read {
                Ok(0) => {
                    tracing::debug!("Connection closed by peer");
                    break;
                }
                Ok(n) => decoder.extend(&buf[..n]),
                Err(e) => {
                    tracing::debug!("Read error: {}", e);
                    break;
                }
            }
        }

        self.state
            .store(ConnectionState::Closed as u8, Ordering::SeqCst);
        self.shutdown.cancel();
        self.fail_pending();
        let shutdown_writer = async { self.writer.lock().await.shutdown().await };
        match tokio::time::timeout(WRITER_SHUTDOWN_TIMEOUT, shutdown_writer).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Error shutting down writer: {}", e),
            Err(_) => tracing::debug!("Timed out shutting down writer"),
        }
        self.finished.cancel();
        tracing::debug!("Connection closed");
    }

    fn dispatch(self: &Arc<Self>, msg: Message) {
        match msg {
            Message::Response(response) => self.complete(response),
            Message::Request(request) => self.spawn_handler(request),
        }
    }

    fn complete(&self, response: Response) {
        let Some(id) = response.id.clone() else {
            tracing::warn!("Discarding response without id: {:?}", response.outcome);
            return;
        };

        match self.pending.lock().remove(&id) {
            Some(call) => {
                tracing::debug!("Received response id={} method={}", id, call.method);
                // The caller may have stopped waiting.
                let _ = call.tx.send(Ok(response));
            }
            None => tracing::warn!("Discarding response with unknown id={}", id),
        }
    }

    fn spawn_handler(self: &Arc<Self>, request: Request) {
        let Some(handler) = self.handler.clone() else {
            if let Some(id) = request.id {
                let conn = self.clone();
                let error = WireError::method_not_found(&request.method);
                tokio::spawn(async move { conn.reply(Response::error(Some(id), error)).await });
            } else {
                tracing::debug!("Ignoring notification method={}", request.method);
            }
            return;
        };

        let conn = self.clone();
        let ctx = Context::from_token(self.shutdown.child_token());
        tokio::spawn(async move {
            let id = request.id.clone();
            let method = request.method.clone();
            tracing::debug!("Handling request id={:?} method={}", id, method);

            let result = AssertUnwindSafe(handler.handle(conn.clone(), ctx, request))
                .catch_unwind()
                .await;

            let outcome = match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(HandlerError::NotHandled)) => Err(WireError::method_not_found(&method)),
                Ok(Err(HandlerError::Rpc(e))) => Err(e),
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    tracing::error!("Handler for {} panicked: {}", method, reason);
                    Err(WireError::new(
                        ErrorCode::INTERNAL_ERROR,
                        format!("handler panicked: {}", reason),
                    ))
                }
            };

            match id {
                Some(id) => conn.reply(Response { id: Some(id), outcome }).await,
                None => {
                    if let Err(e) = outcome {
                        tracing::debug!("Notification {} failed: {}", method, e);
                    }
                }
            }
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// An outbound call awaiting its response.
///
/// Dropping the call, or abandoning [`wait`](AsyncCall::wait) through
/// context cancellation, removes it from the connection's pending set.
pub struct AsyncCall {
    id: Id,
    outcome: Option<Result<oneshot::Receiver<Result<Response, TransportError>>, TransportError>>,
    pending: PendingMap,
}

impl AsyncCall {
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Waits for the raw response.
    pub async fn wait_response(mut self, ctx: &Context) -> Result<Response, TransportError> {
        let rx = match self.outcome.take() {
            Some(Ok(rx)) => rx,
            Some(Err(e)) => return Err(e),
            None => return Err(TransportError::ConnectionClosed),
        };

        tokio::select! {
            biased;
            result = rx => result.unwrap_or(Err(TransportError::ConnectionClosed)),
            err = ctx.done() => {
                tracing::debug!("Call id={} abandoned: {}", self.id, err);
                Err(err.into())
            }
        }
    }

    /// Waits for the response and decodes its result into `T`.
    ///
    /// An error response becomes [`TransportError::Remote`].
    pub async fn wait<T: DeserializeOwned>(self, ctx: &Context) -> Result<T, TransportError> {
        let response = self.wait_response(ctx).await?;
        let value = response.into_result()?;
        serde_json::from_value(value).map_err(TransportError::Decode)
    }
}

impl Drop for AsyncCall {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

impl std::fmt::Debug for AsyncCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncCall").field("id", &self.id).finish()
    }
}
