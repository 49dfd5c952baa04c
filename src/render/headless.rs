//! Headless decoder and surface
//!
//! Nothing is drawn: the decoder only counts what it is fed and the surface
//! keeps the last layout so its on-screen rectangle can be reported.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::error::RenderError;
use crate::geometry::{Rect, Size, SurfaceLayout};
use crate::mirror::VideoCodec;
use crate::render::{DecoderFactory, RenderTarget, VideoDecoder};
use crate::stream::{MediaPacket, PacketKind};

/// Counters shared between a decoder and whoever created it
#[derive(Debug, Default)]
pub struct DecoderStats {
    configurations: AtomicU64,
    frames: AtomicU64,
    released: AtomicBool,
}

impl DecoderStats {
    /// Configuration packets written
    pub fn configurations(&self) -> u64 {
        self.configurations.load(Ordering::Relaxed)
    }

    /// Data packets written
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// True once the decoder has been released
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Relaxed)
    }
}

/// Decoder that discards its input
pub struct NullDecoder {
    stats: Arc<DecoderStats>,
}

impl NullDecoder {
    /// Decoder counting into `stats`
    pub fn new(stats: Arc<DecoderStats>) -> Self {
        Self { stats }
    }
}

impl VideoDecoder for NullDecoder {
    fn write(&mut self, packet: &MediaPacket) -> Result<(), RenderError> {
        if self.stats.is_released() {
            return Err(RenderError::Decoder("decoder already released".into()));
        }
        match packet.kind() {
            PacketKind::Configuration => self.stats.configurations.fetch_add(1, Ordering::Relaxed),
            PacketKind::Data => self.stats.frames.fetch_add(1, Ordering::Relaxed),
        };
        Ok(())
    }

    fn release(&mut self) {
        self.stats.released.store(true, Ordering::Relaxed);
    }
}

/// Creates [`NullDecoder`]s and keeps the stats of each one
#[derive(Default)]
pub struct NullDecoderFactory {
    created: Mutex<Vec<Arc<DecoderStats>>>,
}

impl NullDecoderFactory {
    /// Factory with no decoders created yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Stats of every decoder created so far, oldest first
    pub fn decoders(&self) -> Vec<Arc<DecoderStats>> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DecoderFactory for NullDecoderFactory {
    fn create(
        &self,
        codec: VideoCodec,
        _target: &dyn RenderTarget,
    ) -> Result<Box<dyn VideoDecoder>, RenderError> {
        debug!("Creating null decoder for {}", codec);
        let stats = Arc::new(DecoderStats::default());
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(stats.clone());
        Ok(Box::new(NullDecoder::new(stats)))
    }
}

/// Render target with a fixed container size
pub struct HeadlessSurface {
    container: Size,
    layout: Mutex<Option<SurfaceLayout>>,
    layouts_applied: AtomicUsize,
    fullscreen_exits: AtomicUsize,
}

impl HeadlessSurface {
    /// Surface filling a container of the given size
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            container: Size::new(width, height),
            layout: Mutex::new(None),
            layouts_applied: AtomicUsize::new(0),
            fullscreen_exits: AtomicUsize::new(0),
        }
    }

    /// Last layout applied
    pub fn layout(&self) -> Option<SurfaceLayout> {
        *self.layout.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of layouts applied
    pub fn layouts_applied(&self) -> usize {
        self.layouts_applied.load(Ordering::Relaxed)
    }

    /// Number of full-screen exits requested
    pub fn fullscreen_exits(&self) -> usize {
        self.fullscreen_exits.load(Ordering::Relaxed)
    }
}

impl RenderTarget for HeadlessSurface {
    fn container_size(&self) -> Size {
        self.container
    }

    fn surface_rect(&self) -> Rect {
        match self.layout() {
            // The rotated surface's bounding box; odd turns trade the sides back
            Some(layout) => {
                let visual = if layout.rotation.swaps_axes() {
                    Size::new(layout.height, layout.width)
                } else {
                    Size::new(layout.width, layout.height)
                };
                Rect::new(
                    (self.container.width - visual.width) / 2.0,
                    (self.container.height - visual.height) / 2.0,
                    visual.width,
                    visual.height,
                )
            }
            None => Rect::default(),
        }
    }

    fn apply_layout(&self, layout: &SurfaceLayout) {
        *self.layout.lock().unwrap_or_else(PoisonError::into_inner) = Some(*layout);
        self.layouts_applied.fetch_add(1, Ordering::Relaxed);
    }

    fn exit_fullscreen(&self) {
        self.fullscreen_exits.fetch_add(1, Ordering::Relaxed);
    }
}
