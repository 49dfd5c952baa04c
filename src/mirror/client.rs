//! Device and started-client traits

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::ConnectionResult;
use crate::mirror::options::{ServerOptions, VideoCodec};
use crate::transport::{BoxReader, BoxWriter};

/// Codec and initial frame size announced at the start of the video socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMetadata {
    /// Negotiated codec
    pub codec: VideoCodec,
    /// Initial width in pixels
    pub width: u32,
    /// Initial height in pixels
    pub height: u32,
}

/// Video socket after its metadata header has been consumed
pub struct VideoStream {
    /// Codec and initial size
    pub metadata: VideoMetadata,
    /// Framed media packets follow
    pub packets: BoxReader,
}

/// A device that can host the mirroring server
#[async_trait]
pub trait MirrorDevice: Send + Sync {
    /// Device serial
    fn serial(&self) -> &str;

    /// Writes the server binary to `remote_path` on the device
    async fn push_server(&self, binary: Bytes, remote_path: &str) -> ConnectionResult<()>;

    /// Launches the server and connects to its sockets
    async fn start_client(&self, options: &ServerOptions)
        -> ConnectionResult<Box<dyn MirrorClient>>;
}

/// A started mirroring server
#[async_trait]
pub trait MirrorClient: Send + Sync {
    /// Hands out the video stream; `None` after the first call
    fn take_video_stream(&mut self) -> Option<VideoStream>;

    /// Hands out the control socket writer; `None` after the first call
    fn take_control(&mut self) -> Option<BoxWriter>;

    /// Hands out the server's stdout; `None` after the first call
    fn take_stdout(&mut self) -> Option<BoxReader>;

    /// Cancelled when the remote server goes away
    fn exited(&self) -> CancellationToken;

    /// Asks the server to shut down
    async fn close(&self) -> ConnectionResult<()>;
}

/// What `MirrorSession::start` hands back to the caller
#[derive(Debug, Clone)]
pub struct ClientHandle {
    /// Session the client belongs to
    pub session_id: String,
    /// Device serial
    pub serial: String,
    /// Negotiated video stream parameters
    pub video: Option<VideoMetadata>,
    /// Cancelled when the remote server exits
    pub exited: CancellationToken,
}
