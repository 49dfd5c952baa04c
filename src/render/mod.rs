//! Render module
//!
//! This module defines what the session needs from the display side:
//! - A video decoder fed with every stream unit
//! - A render target that owns the surface and receives layouts
//! - Optional audio playback and recording
//!
//! Headless implementations are provided for the command-line binary and
//! for tests.

pub mod headless;
pub mod recorder;

use crate::error::RenderError;
use crate::geometry::{Rect, Size, SurfaceLayout};
use crate::mirror::{VideoCodec, VideoMetadata};
use crate::stream::MediaPacket;

pub use headless::{DecoderStats, HeadlessSurface, NullDecoder, NullDecoderFactory};
pub use recorder::{AnnexBRecorder, NullRecorder};

/// Consumes encoded units and draws them onto its render target
pub trait VideoDecoder: Send {
    /// Feeds one unit
    ///
    /// # Errors
    ///
    /// Returns an error if the unit could not be decoded; the session logs it
    /// and keeps going
    fn write(&mut self, packet: &MediaPacket) -> Result<(), RenderError>;

    /// Frees decoder resources; calling it twice is harmless
    fn release(&mut self);
}

/// Creates decoders for render targets
pub trait DecoderFactory: Send + Sync {
    /// Creates a decoder drawing into `target`
    fn create(
        &self,
        codec: VideoCodec,
        target: &dyn RenderTarget,
    ) -> Result<Box<dyn VideoDecoder>, RenderError>;
}

/// The display area the video is drawn into
pub trait RenderTarget: Send + Sync {
    /// Size of the container the surface is laid out in
    fn container_size(&self) -> Size;

    /// Current on-screen rectangle of the rendered surface, after rotation
    fn surface_rect(&self) -> Rect;

    /// Resizes and rotates the surface
    fn apply_layout(&self, layout: &SurfaceLayout);

    /// Leaves full-screen mode
    fn exit_fullscreen(&self);
}

/// Audio playback attached to a session
pub trait AudioPlayer: Send {
    /// Stops playback; called once when the session is disposed
    fn stop(&mut self);
}

/// Writes the received stream somewhere for later playback
pub trait Recorder: Send {
    /// Called once per started session before any packet
    fn set_video_metadata(&mut self, metadata: &VideoMetadata);

    /// Records one unit
    fn add_video_packet(&mut self, packet: &MediaPacket) -> Result<(), RenderError>;
}
