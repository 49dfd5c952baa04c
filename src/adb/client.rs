//! Client for the ADB server's host services

use bytes::Bytes;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::adb::protocol::{
    read_length_prefixed, read_status, sync_push, write_request, DEFAULT_FILE_MODE,
};
use crate::error::ConnectionResult;
use crate::transport::{ConnectOptions, Connection, Connector};

/// A device as listed by `host:devices`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device serial
    pub serial: String,
    /// Connection state, e.g. `device`, `offline`, `unauthorized`
    pub state: String,
}

impl DeviceInfo {
    /// True when the device accepts commands
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }
}

/// Parses the body of a `host:devices` reply
pub fn parse_device_list(body: &str) -> Vec<DeviceInfo> {
    body.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let serial = fields.next()?;
            let state = fields.next()?;
            Some(DeviceInfo {
                serial: serial.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}

/// Talks to the ADB server through a [`Connector`]
///
/// Every service gets its own connection, as the server closes the socket
/// after a host request and dedicates it to the device after a transport
/// switch.
#[derive(Clone)]
pub struct AdbServerClient {
    connector: Arc<dyn Connector>,
    options: ConnectOptions,
}

impl AdbServerClient {
    /// Creates a client over `connector`
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            options: ConnectOptions::default(),
        }
    }

    /// Sets the options used for every connection
    pub fn with_options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }

    async fn request(&self, service: &str) -> ConnectionResult<Connection> {
        let mut connection = self.connector.connect(&self.options).await?;
        write_request(&mut connection.writer, service).await?;
        read_status(&mut connection.reader).await?;
        Ok(connection)
    }

    /// Opens `service` on the device with `serial`
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::Rejected` if the server refuses the
    /// transport switch or the service
    pub async fn connect_service(&self, serial: &str, service: &str) -> ConnectionResult<Connection> {
        let mut connection = self.request(&format!("host:transport:{}", serial)).await?;
        write_request(&mut connection.writer, service).await?;
        read_status(&mut connection.reader).await?;
        debug!("Opened {} on {}", service, serial);
        Ok(connection)
    }

    /// Lists attached devices
    pub async fn devices(&self) -> ConnectionResult<Vec<DeviceInfo>> {
        let mut connection = self.request("host:devices").await?;
        let body = read_length_prefixed(&mut connection.reader).await?;
        Ok(parse_device_list(&body))
    }

    /// Runs `command` in a shell; the connection carries its output
    pub async fn shell(&self, serial: &str, command: &str) -> ConnectionResult<Connection> {
        self.connect_service(serial, &format!("shell:{}", command))
            .await
    }

    /// Writes `data` to `remote_path` on the device
    pub async fn push(&self, serial: &str, data: Bytes, remote_path: &str) -> ConnectionResult<()> {
        let mut connection = self.connect_service(serial, "sync:").await?;
        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);

        sync_push(
            &mut connection.reader,
            &mut connection.writer,
            remote_path,
            DEFAULT_FILE_MODE,
            mtime,
            &data,
        )
        .await?;

        // QUIT, the server closes the connection afterwards
        let _ = connection.writer.write_all(b"QUIT\0\0\0\0").await;
        debug!("Pushed {} bytes to {}:{}", data.len(), serial, remote_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectionError;
    use crate::transport::TcpConnector;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut length = [0u8; 4];
        socket.read_exact(&mut length).await.unwrap();
        let length = usize::from_str_radix(std::str::from_utf8(&length).unwrap(), 16).unwrap();
        let mut service = vec![0u8; length];
        socket.read_exact(&mut service).await.unwrap();
        String::from_utf8(service).unwrap()
    }

    async fn listen() -> (TcpListener, AdbServerClient) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = AdbServerClient::new(Arc::new(TcpConnector::new("127.0.0.1", port)));
        (listener, client)
    }

    #[test]
    fn test_parse_device_list() {
        let devices = parse_device_list("emulator-5554\tdevice\nR58M123\tunauthorized\n\n");
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "emulator-5554");
        assert!(devices[0].is_online());
        assert!(!devices[1].is_online());
        assert!(parse_device_list("").is_empty());
    }

    #[tokio::test]
    async fn test_devices() {
        let (listener, client) = listen().await;

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            assert_eq!(read_request(&mut socket).await, "host:devices");
            let body = "emulator-5554\tdevice\n";
            socket
                .write_all(format!("OKAY{:04x}{}", body.len(), body).as_bytes())
                .await
                .unwrap();
        });

        let devices = client.devices().await.unwrap();
        assert_eq!(
            devices,
            vec![DeviceInfo {
                serial: "emulator-5554".into(),
                state: "device".into()
            }]
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_service_switches_transport() {
        let (listener, client) = listen().await;

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            assert_eq!(
                read_request(&mut socket).await,
                "host:transport:emulator-5554"
            );
            socket.write_all(b"OKAY").await.unwrap();
            assert_eq!(read_request(&mut socket).await, "shell:echo hi");
            socket.write_all(b"OKAYhi\n").await.unwrap();
        });

        let mut connection = client.shell("emulator-5554", "echo hi").await.unwrap();
        let mut output = String::new();
        connection.reader.read_to_string(&mut output).await.unwrap();
        assert_eq!(output, "hi\n");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_device_is_rejected() {
        let (listener, client) = listen().await;

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            socket.write_all(b"FAIL0010device not found").await.unwrap();
        });

        let result = client.connect_service("missing", "shell:").await;
        assert!(matches!(result, Err(ConnectionError::Rejected(msg)) if msg == "device not found"));
    }
}
