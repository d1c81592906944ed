//! Byte stream produced by listeners and dialers.

use crate::listener::IdleGuard;
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpStream;

pin_project! {
    #[project = InnerProj]
    enum Inner {
        Tcp { #[pin] stream: TcpStream },
        Pipe { #[pin] stream: DuplexStream },
    }
}

pin_project! {
    /// A TCP socket or one end of an in-process pipe.
    ///
    /// Streams accepted through an [`IdleListener`](crate::IdleListener)
    /// count as active until dropped.
    pub struct Stream {
        #[pin]
        inner: Inner,
        guard: Option<IdleGuard>,
    }
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self {
            inner: Inner::Tcp { stream },
            guard: None,
        }
    }

    pub fn pipe(stream: DuplexStream) -> Self {
        Self {
            inner: Inner::Pipe { stream },
            guard: None,
        }
    }

    pub fn is_pipe(&self) -> bool {
        matches!(self.inner, Inner::Pipe { .. })
    }

    pub(crate) fn set_guard(&mut self, guard: IdleGuard) {
        self.guard = Some(guard);
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_pipe() { "pipe" } else { "tcp" };
        f.debug_struct("Stream")
            .field("kind", &kind)
            .field("tracked", &self.guard.is_some())
            .finish()
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project().inner.project() {
            InnerProj::Tcp { stream } => stream.poll_read(cx, buf),
            InnerProj::Pipe { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project().inner.project() {
            InnerProj::Tcp { stream } => stream.poll_write(cx, buf),
            InnerProj::Pipe { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project().inner.project() {
            InnerProj::Tcp { stream } => stream.poll_flush(cx),
            InnerProj::Pipe { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project().inner.project() {
            InnerProj::Tcp { stream } => stream.poll_shutdown(cx),
            InnerProj::Pipe { stream } => stream.poll_shutdown(cx),
        }
    }
}
