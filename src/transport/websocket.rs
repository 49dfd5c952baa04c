//! WebSocket bridge connector
//!
//! The bridge relays binary WebSocket frames to and from a TCP socket on
//! the ADB server. A pump task owns the socket; the connection's reader
//! and writer talk to it over bounded channels, which gives the writer
//! back-pressure when the socket is slow.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::io;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::io::{CopyToBytes, SinkWriter, StreamReader};
use tokio_util::sync::{CancellationToken, PollSender};
use tracing::{debug, trace, warn};

use crate::error::{ConnectionError, ConnectionResult};
use crate::transport::{ConnectOptions, Connection, ConnectionHandle, Connector};

/// Received chunks buffered ahead of the reader
const INCOMING_BUFFER: usize = 64;

/// Outgoing chunks buffered ahead of the socket
const OUTGOING_BUFFER: usize = 16;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to an ADB server through a WebSocket-to-TCP bridge
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Creates a connector for `ws://host:port`
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            url: format!("ws://{}:{}", host, port),
        }
    }

    /// Creates a connector for an explicit URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// URL this connector dials
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, options: &ConnectOptions) -> ConnectionResult<Connection> {
        let handshake = tokio_tungstenite::connect_async(self.url.as_str());

        let (socket, _response) = match options.timeout {
            Some(timeout) => tokio::time::timeout(timeout, handshake)
                .await
                .map_err(|_| ConnectionError::Timeout(timeout))?,
            None => handshake.await,
        }
        .map_err(|e| ConnectionError::Handshake(format!("{}: {}", self.url, e)))?;

        debug!("WebSocket bridge connected: {}", self.url);
        Ok(bridge_connection(socket))
    }
}

/// Spawns the pump task and wraps its channels as a byte stream
fn bridge_connection(socket: WsStream) -> Connection {
    let handle = ConnectionHandle::new();
    let (incoming_tx, incoming_rx) = mpsc::channel::<io::Result<Bytes>>(INCOMING_BUFFER);
    let (outgoing_tx, outgoing_rx) = mpsc::channel::<Bytes>(OUTGOING_BUFFER);

    tokio::spawn(pump(
        socket,
        incoming_tx,
        outgoing_rx,
        handle.shutdown_token(),
        handle.closed_token(),
    ));

    let chunks = futures::stream::unfold(incoming_rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });
    let reader = Box::pin(StreamReader::new(chunks));

    let sink = PollSender::new(outgoing_tx)
        .sink_map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe));
    let writer = SinkWriter::new(CopyToBytes::new(sink));

    Connection::new(reader, writer, handle)
}

/// Moves bytes between the socket and the connection channels until the
/// peer closes, an error occurs, or a close is requested
async fn pump(
    socket: WsStream,
    incoming: mpsc::Sender<io::Result<Bytes>>,
    mut outgoing: mpsc::Receiver<Bytes>,
    shutdown: CancellationToken,
    closed: CancellationToken,
) {
    let (mut sink, mut stream) = socket.split();
    let mut writer_open = true;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            chunk = outgoing.recv(), if writer_open => match chunk {
                Some(chunk) => {
                    trace!("Bridge send: {} bytes", chunk.len());
                    if let Err(e) = sink.send(Message::Binary(chunk.to_vec())).await {
                        warn!("WebSocket send failed: {}", e);
                        break;
                    }
                }
                None => writer_open = false,
            },
            message = stream.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    trace!("Bridge recv: {} bytes", data.len());
                    // A dropped reader is fine; the writer may still be in use
                    let _ = incoming.send(Ok(Bytes::from(data))).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("WebSocket bridge closed by peer");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = incoming
                        .send(Err(io::Error::new(io::ErrorKind::Other, e.to_string())))
                        .await;
                    break;
                }
            },
        }
    }

    closed.cancel();
}
