//! Listeners, dialers and the idle-timeout listener.

use crate::error::TransportError;
use crate::stream::Stream;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

/// Default buffer size of each direction of an in-process pipe.
pub const DEFAULT_PIPE_BUFFER: usize = 64 * 1024;

/// Source of inbound streams.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Waits for the next inbound stream.
    ///
    /// Returns [`TransportError::ListenerClosed`] once the listener is closed.
    async fn accept(&self) -> Result<Stream, TransportError>;

    /// Stops accepting. Pending and future `accept` calls fail.
    fn close(&self);

    /// Returns a dialer that connects to this listener.
    fn dialer(&self) -> Arc<dyn Dialer>;
}

/// Opens outbound streams.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> Result<Stream, TransportError>;
}

pub struct TcpListener {
    inner: tokio::net::TcpListener,
    local_addr: SocketAddr,
    closed: CancellationToken,
}

impl TcpListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let inner = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = inner.local_addr()?;
        tracing::debug!("Listening on {}", local_addr);
        Ok(Self {
            inner,
            local_addr,
            closed: CancellationToken::new(),
        })
    }

    /// Address actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Listener for TcpListener {
    async fn accept(&self) -> Result<Stream, TransportError> {
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::ListenerClosed),
            result = self.inner.accept() => {
                let (stream, peer) = result?;
                stream.set_nodelay(true).ok();
                tracing::debug!("Accepted connection from {}", peer);
                Ok(Stream::tcp(stream))
            }
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn dialer(&self) -> Arc<dyn Dialer> {
        Arc::new(TcpDialer::new(self.local_addr))
    }
}

#[derive(Debug, Clone)]
pub struct TcpDialer {
    addr: SocketAddr,
}

impl TcpDialer {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self) -> Result<Stream, TransportError> {
        let stream = tokio::net::TcpStream::connect(self.addr).await?;
        stream.set_nodelay(true).ok();
        tracing::debug!("Connected to {}", self.addr);
        Ok(Stream::tcp(stream))
    }
}

/// In-process listener backed by `tokio::io::duplex` pipes.
pub struct PipeListener {
    incoming: Mutex<mpsc::Receiver<DuplexStream>>,
    dialer: PipeDialer,
}

impl PipeListener {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_PIPE_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(16);
        Self {
            incoming: Mutex::new(rx),
            dialer: PipeDialer {
                tx,
                buffer,
                closed: CancellationToken::new(),
            },
        }
    }
}

impl Default for PipeListener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Listener for PipeListener {
    async fn accept(&self) -> Result<Stream, TransportError> {
        let closed = &self.dialer.closed;
        if closed.is_cancelled() {
            return Err(TransportError::ListenerClosed);
        }
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            _ = closed.cancelled() => Err(TransportError::ListenerClosed),
            stream = incoming.recv() => {
                stream.map(Stream::pipe).ok_or(TransportError::ListenerClosed)
            }
        }
    }

    fn close(&self) {
        self.dialer.closed.cancel();
    }

    fn dialer(&self) -> Arc<dyn Dialer> {
        Arc::new(self.dialer.clone())
    }
}

#[derive(Debug, Clone)]
pub struct PipeDialer {
    tx: mpsc::Sender<DuplexStream>,
    buffer: usize,
    closed: CancellationToken,
}

#[async_trait]
impl Dialer for PipeDialer {
    async fn dial(&self) -> Result<Stream, TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::ListenerClosed);
        }
        let (local, remote) = tokio::io::duplex(self.buffer);
        self.tx
            .send(remote)
            .await
            .map_err(|_| TransportError::ListenerClosed)?;
        Ok(Stream::pipe(local))
    }
}

/// Keeps a stream counted as active until dropped.
pub(crate) struct IdleGuard {
    active: Arc<watch::Sender<usize>>,
}

impl IdleGuard {
    fn new(active: Arc<watch::Sender<usize>>) -> Self {
        active.send_modify(|n| *n += 1);
        Self { active }
    }
}

impl Drop for IdleGuard {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Wraps a listener and closes it once no accepted stream has been open for
/// `timeout`.
///
/// The timer runs whenever the number of open accepted streams is zero,
/// including before the first accept. When it fires, the inner listener is
/// closed and `accept` returns [`TransportError::IdleTimeout`].
pub struct IdleListener {
    inner: Arc<dyn Listener>,
    timeout: Duration,
    active: Arc<watch::Sender<usize>>,
    timed_out: AtomicBool,
}

impl IdleListener {
    pub fn new(inner: Arc<dyn Listener>, timeout: Duration) -> Self {
        let (active, _) = watch::channel(0);
        Self {
            inner,
            timeout,
            active: Arc::new(active),
            timed_out: AtomicBool::new(false),
        }
    }

    /// Number of accepted streams still open.
    pub fn active(&self) -> usize {
        *self.active.borrow()
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Listener for IdleListener {
    async fn accept(&self) -> Result<Stream, TransportError> {
        if self.timed_out() {
            return Err(TransportError::IdleTimeout);
        }

        let mut active = self.active.subscribe();
        loop {
            let idle = *active.borrow_and_update() == 0;
            let timer = async {
                if idle {
                    tokio::time::sleep(self.timeout).await
                } else {
                    std::future::pending::<()>().await
                }
            };

            tokio::select! {
                result = self.inner.accept() => {
                    let mut stream = result?;
                    stream.set_guard(IdleGuard::new(self.active.clone()));
                    return Ok(stream);
                }
                _ = timer => {
                    tracing::info!("No connections for {:?}, closing listener", self.timeout);
                    self.timed_out.store(true, Ordering::SeqCst);
                    self.inner.close();
                    return Err(TransportError::IdleTimeout);
                }
                // Connection count changed; re-evaluate the timer.
                _ = active.changed() => {}
            }
        }
    }

    fn close(&self) {
        self.inner.close();
    }

    fn dialer(&self) -> Arc<dyn Dialer> {
        self.inner.dialer()
    }
}
