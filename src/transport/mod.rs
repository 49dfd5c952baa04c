//! Transport connectors
//!
//! A connector opens a duplex byte stream to the ADB server, either over
//! plain TCP or through a WebSocket bridge. Every connection exposes a
//! close request and a closed notification that fires exactly once, when
//! the reader sees end-of-stream or an error.

pub mod tcp;
pub mod websocket;

use async_trait::async_trait;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::error::ConnectionResult;

pub use tcp::TcpConnector;
pub use websocket::WebSocketConnector;

/// Boxed read half of a connection
pub type BoxReader = Pin<Box<dyn AsyncRead + Send>>;

/// Boxed write half of a connection
pub type BoxWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Options for a single connect call
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Give up if the connection is not established within this time
    pub timeout: Option<Duration>,
}

impl ConnectOptions {
    /// Sets the connect timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Opens byte streams to the ADB server
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new connection
    async fn connect(&self, options: &ConnectOptions) -> ConnectionResult<Connection>;

    /// Reverse tunnels are not used by the mirroring session
    async fn add_reverse_tunnel(&self, _serial: &str, _address: &str) -> ConnectionResult<String> {
        Ok(String::new())
    }

    /// See [`Connector::add_reverse_tunnel`]
    async fn remove_reverse_tunnel(&self, _serial: &str, _address: &str) -> ConnectionResult<()> {
        Ok(())
    }

    /// See [`Connector::add_reverse_tunnel`]
    async fn clear_reverse_tunnels(&self, _serial: &str) -> ConnectionResult<()> {
        Ok(())
    }
}

/// Close request and closed notification shared by both halves
#[derive(Debug, Clone, Default)]
pub struct ConnectionHandle {
    shutdown: CancellationToken,
    closed: CancellationToken,
}

impl ConnectionHandle {
    /// Creates a handle with fresh tokens
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the connection to close; the reader reports end-of-stream
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Resolves once the connection has ended
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Returns true once the connection has ended
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled on close request
    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Token cancelled once the connection ends
    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// A duplex byte stream to the ADB server
pub struct Connection {
    /// Bytes received from the server, delivered as they arrive
    pub reader: BoxReader,
    /// Bytes sent to the server; flow control is the writer's own
    pub writer: BoxWriter,
    handle: ConnectionHandle,
}

impl Connection {
    /// Wraps a reader/writer pair; the reader is watched for end-of-stream
    pub fn new<R, W>(reader: R, writer: W, handle: ConnectionHandle) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        let reader = WatchedReader::new(reader, &handle);
        Self {
            reader: Box::pin(reader),
            writer: Box::pin(writer),
            handle,
        }
    }

    /// Builds a connection from any duplex stream
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer, ConnectionHandle::new())
    }

    /// Returns a handle that outlives the split halves
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Splits into reader, writer and handle
    pub fn into_parts(self) -> (BoxReader, BoxWriter, ConnectionHandle) {
        (self.reader, self.writer, self.handle)
    }
}

/// Reader adapter that turns a close request into end-of-stream and
/// signals `closed` when the underlying stream ends
struct WatchedReader<R> {
    inner: R,
    shutdown: Pin<Box<WaitForCancellationFutureOwned>>,
    closed: CancellationToken,
}

impl<R> WatchedReader<R> {
    fn new(inner: R, handle: &ConnectionHandle) -> Self {
        Self {
            inner,
            shutdown: Box::pin(handle.shutdown_token().cancelled_owned()),
            closed: handle.closed_token(),
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for WatchedReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;

        if this.closed.is_cancelled() || this.shutdown.as_mut().poll(cx).is_ready() {
            this.closed.cancel();
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        match &result {
            Poll::Ready(Ok(())) if buf.filled().len() == before && buf.remaining() > 0 => {
                this.closed.cancel();
            }
            Poll::Ready(Err(_)) => this.closed.cancel(),
            _ => {}
        }
        result
    }
}
