//! Direct TCP connector to an ADB server

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{ConnectionError, ConnectionResult};
use crate::transport::{ConnectOptions, Connection, Connector};

/// Default ADB server port
pub const DEFAULT_ADB_PORT: u16 = 5037;

/// Connects straight to an ADB server over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    /// Creates a connector for `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Connector for the local ADB server on its default port
    pub fn local() -> Self {
        Self::new("127.0.0.1", DEFAULT_ADB_PORT)
    }

    /// Address this connector dials
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, options: &ConnectOptions) -> ConnectionResult<Connection> {
        let address = self.address();
        let connect = TcpStream::connect(&address);

        let stream = match options.timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| ConnectionError::Timeout(timeout))?,
            None => connect.await,
        }
        .map_err(|e| ConnectionError::ConnectFailed(format!("{}: {}", address, e)))?;

        stream.set_nodelay(true)?;
        debug!("Connected to ADB server at {}", address);

        Ok(Connection::from_stream(stream))
    }
}
