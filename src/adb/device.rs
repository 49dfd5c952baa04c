//! Mirroring over an ADB-attached device
//!
//! The server is started through `shell:` and listens on an abstract
//! socket. The client dials it twice through the ADB server: first the
//! video socket, then the control socket. Until the server is listening
//! the dial fails, so it is retried a bounded number of times.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adb::client::AdbServerClient;
use crate::error::{ConnectionError, ConnectionResult};
use crate::mirror::{MirrorClient, MirrorDevice, ServerOptions, VideoStream};
use crate::stream::read_video_metadata;
use crate::transport::{BoxReader, BoxWriter, Connection, ConnectionHandle};

/// Default number of dial attempts for the server's socket
pub const DEFAULT_TUNNEL_ATTEMPTS: u32 = 20;

/// Default delay between dial attempts
pub const DEFAULT_TUNNEL_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A device reachable through the ADB server
pub struct AdbDevice {
    client: AdbServerClient,
    serial: String,
    tunnel_attempts: u32,
    retry_delay: Duration,
}

impl AdbDevice {
    /// Device `serial` reached through `client`
    pub fn new(client: AdbServerClient, serial: impl Into<String>) -> Self {
        Self {
            client,
            serial: serial.into(),
            tunnel_attempts: DEFAULT_TUNNEL_ATTEMPTS,
            retry_delay: DEFAULT_TUNNEL_RETRY_DELAY,
        }
    }

    /// Sets how often and how fast the server socket is dialed
    pub fn with_tunnel_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.tunnel_attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    async fn dial_server(&self, socket_name: &str) -> ConnectionResult<Connection> {
        let service = format!("localabstract:{}", socket_name);
        let mut attempt = 1;

        loop {
            match self.client.connect_service(&self.serial, &service).await {
                Ok(connection) => return Ok(connection),
                Err(e @ (ConnectionError::Rejected(_) | ConnectionError::Closed))
                    if attempt < self.tunnel_attempts =>
                {
                    debug!(
                        "Server socket {} not ready (attempt {}): {}",
                        socket_name, attempt, e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl MirrorDevice for AdbDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    async fn push_server(&self, binary: Bytes, remote_path: &str) -> ConnectionResult<()> {
        self.client.push(&self.serial, binary, remote_path).await
    }

    async fn start_client(
        &self,
        options: &ServerOptions,
    ) -> ConnectionResult<Box<dyn MirrorClient>> {
        let command = options.command_line();
        info!("Starting server on {}: {}", self.serial, command);

        let shell = self.client.shell(&self.serial, &command).await?;
        let shell_handle = shell.handle();
        let (stdout, _stdin, _) = shell.into_parts();

        let socket_name = options.socket_name();
        let result = async {
            let video = self.dial_server(&socket_name).await?;
            let control = self.dial_server(&socket_name).await?;
            Ok::<_, ConnectionError>((video, control))
        }
        .await;

        let (video, control) = match result {
            Ok(sockets) => sockets,
            Err(e) => {
                shell_handle.close();
                return Err(e);
            }
        };

        let video_handle = video.handle();
        let control_handle = control.handle();
        let (mut video_reader, _, _) = video.into_parts();
        let (control_reader, control_writer, _) = control.into_parts();

        // The server only starts streaming once both sockets are connected
        let metadata = match read_video_metadata(&mut video_reader).await {
            Ok(metadata) => metadata,
            Err(e) => {
                for handle in [&shell_handle, &video_handle, &control_handle] {
                    handle.close();
                }
                return Err(ConnectionError::Protocol(format!(
                    "video header: {}",
                    e
                )));
            }
        };
        debug!(
            "Video stream {} {}x{}",
            metadata.codec, metadata.width, metadata.height
        );

        tokio::spawn(drain_device_messages(control_reader));

        let exited = CancellationToken::new();
        tokio::spawn(watch_exit(
            exited.clone(),
            shell_handle.clone(),
            video_handle.clone(),
        ));

        Ok(Box::new(AdbMirrorClient {
            video: Mutex::new(Some(VideoStream {
                metadata,
                packets: video_reader,
            })),
            control: Mutex::new(Some(control_writer)),
            stdout: Mutex::new(Some(stdout)),
            exited,
            handles: vec![shell_handle, video_handle, control_handle],
        }))
    }
}

/// Device messages (clipboard etc.) are not consumed
async fn drain_device_messages(mut reader: BoxReader) {
    let mut sink = tokio::io::sink();
    if let Err(e) = tokio::io::copy(&mut reader, &mut sink).await {
        debug!("Control socket ended: {}", e);
    }
}

async fn watch_exit(exited: CancellationToken, shell: ConnectionHandle, video: ConnectionHandle) {
    tokio::select! {
        _ = shell.closed() => info!("Server process exited"),
        _ = video.closed() => info!("Video socket closed"),
        _ = exited.cancelled() => return,
    }
    exited.cancel();
}

/// Hands out a take-once value; the mutex only makes the holder `Sync`
fn take_once<T>(slot: &mut Mutex<Option<T>>) -> Option<T> {
    slot.get_mut().unwrap_or_else(PoisonError::into_inner).take()
}

/// Server started on an ADB device
pub struct AdbMirrorClient {
    video: Mutex<Option<VideoStream>>,
    control: Mutex<Option<BoxWriter>>,
    stdout: Mutex<Option<BoxReader>>,
    exited: CancellationToken,
    handles: Vec<ConnectionHandle>,
}

#[async_trait]
impl MirrorClient for AdbMirrorClient {
    fn take_video_stream(&mut self) -> Option<VideoStream> {
        take_once(&mut self.video)
    }

    fn take_control(&mut self) -> Option<BoxWriter> {
        take_once(&mut self.control)
    }

    fn take_stdout(&mut self) -> Option<BoxReader> {
        take_once(&mut self.stdout)
    }

    fn exited(&self) -> CancellationToken {
        self.exited.clone()
    }

    async fn close(&self) -> ConnectionResult<()> {
        if self.exited.is_cancelled() && self.handles.iter().all(ConnectionHandle::is_closed) {
            return Ok(());
        }
        // Ending the shell connection kills the server process
        for handle in &self.handles {
            handle.close();
        }
        self.exited.cancel();
        Ok(())
    }
}

impl Drop for AdbMirrorClient {
    fn drop(&mut self) {
        if !self.exited.is_cancelled() {
            warn!("Mirror client dropped while the server is running");
            for handle in &self.handles {
                handle.close();
            }
            self.exited.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::{InstanceId, VideoCodec};
    use crate::transport::TcpConnector;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    async fn read_request(socket: &mut TcpStream) -> Option<String> {
        let mut length = [0u8; 4];
        socket.read_exact(&mut length).await.ok()?;
        let length = usize::from_str_radix(std::str::from_utf8(&length).ok()?, 16).ok()?;
        let mut service = vec![0u8; length];
        socket.read_exact(&mut service).await.ok()?;
        String::from_utf8(service).ok()
    }

    /// ADB server stand-in: refuses the first socket dial, then serves
    /// video and control; open sockets are handed to the test by service
    async fn fake_adb_server() -> (u16, mpsc::UnboundedReceiver<(String, TcpStream)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::unbounded_channel();
        let dials = Arc::new(AtomicUsize::new(0));

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let tx = tx.clone();
                let dials = dials.clone();
                tokio::spawn(async move {
                    let transport = read_request(&mut socket).await.unwrap();
                    assert_eq!(transport, "host:transport:emulator-5554");
                    socket.write_all(b"OKAY").await.unwrap();

                    let service = read_request(&mut socket).await.unwrap();
                    let mut label = service.clone();
                    if service.starts_with("localabstract:") {
                        let dial = dials.fetch_add(1, Ordering::SeqCst);
                        label = format!("{}#{}", service, dial);
                        match dial {
                            0 => {
                                socket.write_all(b"FAIL0006closed").await.unwrap();
                                return;
                            }
                            1 => {
                                socket.write_all(b"OKAY").await.unwrap();
                                let mut header = Vec::new();
                                header.extend_from_slice(&VideoCodec::H264.codec_id().to_be_bytes());
                                header.extend_from_slice(&1080u32.to_be_bytes());
                                header.extend_from_slice(&2400u32.to_be_bytes());
                                socket.write_all(&header).await.unwrap();
                            }
                            _ => socket.write_all(b"OKAY").await.unwrap(),
                        }
                    } else {
                        socket.write_all(b"OKAY").await.unwrap();
                    }
                    let _ = tx.send((label, socket));
                });
            }
        });

        (port, rx)
    }

    #[tokio::test]
    async fn test_start_client_dials_video_then_control() {
        let (port, mut sockets) = fake_adb_server().await;
        let client = AdbServerClient::new(Arc::new(TcpConnector::new("127.0.0.1", port)));
        let device = AdbDevice::new(client, "emulator-5554")
            .with_tunnel_retry(5, Duration::from_millis(10));

        let options = ServerOptions::default()
            .with_scid(InstanceId::from_raw(0x1234));
        let mut started = device.start_client(&options).await.unwrap();

        let mut opened = std::collections::HashMap::new();
        for _ in 0..3 {
            let (label, socket) = sockets.recv().await.unwrap();
            let key = if label.starts_with("shell:CLASSPATH=") {
                "shell".to_string()
            } else {
                label
            };
            opened.insert(key, socket);
        }
        let mut shell = opened.remove("shell").unwrap();
        let _video = opened.remove("localabstract:scrcpy_00001234#1").unwrap();
        let mut control = opened.remove("localabstract:scrcpy_00001234#2").unwrap();

        let video = started.take_video_stream().unwrap();
        assert_eq!(video.metadata.codec, VideoCodec::H264);
        assert_eq!((video.metadata.width, video.metadata.height), (1080, 2400));
        assert!(started.take_video_stream().is_none());

        let mut writer = started.take_control().unwrap();
        writer.write_all(&[4, 1]).await.unwrap();
        writer.flush().await.unwrap();
        let mut received = [0u8; 2];
        control.read_exact(&mut received).await.unwrap();
        assert_eq!(received, [4, 1]);

        let mut stdout = started.take_stdout().unwrap();
        shell.write_all(b"[server] INFO: Device: test\n").await.unwrap();
        let mut line = [0u8; 28];
        stdout.read_exact(&mut line).await.unwrap();
        assert_eq!(&line, b"[server] INFO: Device: test\n");

        let exited = started.exited();
        assert!(!exited.is_cancelled());
        drop(shell);
        let mut rest = Vec::new();
        stdout.read_to_end(&mut rest).await.unwrap();
        exited.cancelled().await;

        started.close().await.unwrap();
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_client_is_shareable_across_tasks() {
        assert_send_sync::<AdbMirrorClient>();
        assert_send_sync::<Arc<dyn MirrorClient>>();
    }

    #[tokio::test]
    async fn test_dial_gives_up_after_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                read_request(&mut socket).await;
                socket.write_all(b"OKAY").await.unwrap();
                read_request(&mut socket).await;
                socket.write_all(b"FAIL0006closed").await.unwrap();
            }
        });

        let client = AdbServerClient::new(Arc::new(TcpConnector::new("127.0.0.1", port)));
        let device =
            AdbDevice::new(client, "emulator-5554").with_tunnel_retry(3, Duration::from_millis(1));

        let result = device.dial_server("scrcpy_00000001").await;
        assert!(matches!(result, Err(ConnectionError::Rejected(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
