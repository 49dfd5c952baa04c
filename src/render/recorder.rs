//! Stream recorders

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::RenderError;
use crate::mirror::VideoMetadata;
use crate::render::Recorder;
use crate::stream::{MediaPacket, PacketKind};

/// Recorder that keeps nothing
#[derive(Debug, Default)]
pub struct NullRecorder {
    metadata: Option<VideoMetadata>,
    packets: u64,
}

impl NullRecorder {
    /// Recorder that has seen nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata of the last started session
    pub fn metadata(&self) -> Option<VideoMetadata> {
        self.metadata
    }

    /// Units seen so far
    pub fn packets(&self) -> u64 {
        self.packets
    }
}

impl Recorder for NullRecorder {
    fn set_video_metadata(&mut self, metadata: &VideoMetadata) {
        self.metadata = Some(*metadata);
    }

    fn add_video_packet(&mut self, _packet: &MediaPacket) -> Result<(), RenderError> {
        self.packets += 1;
        Ok(())
    }
}

/// Writes the raw Annex B elementary stream to a file
///
/// Payloads from the device already carry start codes, so concatenating
/// configuration and frame units yields a playable `.h264`/`.h265` file.
/// Frames received before the first configuration packet are skipped.
pub struct AnnexBRecorder {
    path: PathBuf,
    writer: BufWriter<File>,
    configured: bool,
    bytes_written: u64,
}

impl AnnexBRecorder {
    /// Creates or truncates the output file
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created
    pub fn create(path: impl AsRef<Path>) -> Result<Self, RenderError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            configured: false,
            bytes_written: 0,
        })
    }

    /// Bytes written to the file so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl Recorder for AnnexBRecorder {
    fn set_video_metadata(&mut self, metadata: &VideoMetadata) {
        info!(
            "Recording {} {}x{} to {}",
            metadata.codec,
            metadata.width,
            metadata.height,
            self.path.display()
        );
    }

    fn add_video_packet(&mut self, packet: &MediaPacket) -> Result<(), RenderError> {
        match packet {
            MediaPacket::Configuration { .. } => self.configured = true,
            MediaPacket::Data(_) if !self.configured => return Ok(()),
            MediaPacket::Data(_) => {}
        }

        self.writer.write_all(packet.bytes())?;
        self.bytes_written += packet.len() as u64;
        if packet.kind() == PacketKind::Configuration {
            self.writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for AnnexBRecorder {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::VideoCodec;
    use tempfile::TempDir;

    #[test]
    fn test_annexb_recorder_skips_frames_before_configuration() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capture.h264");

        {
            let mut recorder = AnnexBRecorder::create(&path).unwrap();
            recorder.set_video_metadata(&VideoMetadata {
                codec: VideoCodec::H264,
                width: 1080,
                height: 2400,
            });
            recorder
                .add_video_packet(&MediaPacket::data(0, false, vec![9, 9]))
                .unwrap();
            recorder
                .add_video_packet(&MediaPacket::configuration(vec![0, 0, 0, 1, 0x67]))
                .unwrap();
            recorder
                .add_video_packet(&MediaPacket::data(1, true, vec![0, 0, 0, 1, 0x65]))
                .unwrap();
            assert_eq!(recorder.bytes_written(), 10);
        }

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, vec![0, 0, 0, 1, 0x67, 0, 0, 0, 1, 0x65]);
    }

    #[test]
    fn test_null_recorder_counts() {
        let mut recorder = NullRecorder::new();
        assert!(recorder.metadata().is_none());
        recorder
            .add_video_packet(&MediaPacket::configuration(vec![1]))
            .unwrap();
        assert_eq!(recorder.packets(), 1);
    }
}
