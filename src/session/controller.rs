//! Mirroring session controller
//!
//! A session owns one device connection from start to teardown:
//! - Pushing and starting the mirroring server
//! - Running the video pipeline that feeds decoder, recorder and state
//! - Tracking frame size and rotation and keeping the layout current
//! - Releasing decoder, input and audio in a fixed order on dispose
//!
//! State lives behind a std mutex and atomics and is never held across an
//! await. Every dispose bumps a start epoch; a start that finds the epoch
//! changed after one of its awaits gives up with `StartError::Cancelled`.

use bytes::Bytes;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{InputError, ListenerError, RenderError, StartError};
use crate::geometry::{compute_layout, map_to_device, DevicePoint, Size, SurfaceLayout};
use crate::input::{InputInjector, MotionAction, Position};
use crate::logging::SERVER_LOG_TARGET;
use crate::mirror::{
    ClientHandle, InstanceId, MirrorClient, MirrorDevice, ServerOptions, VideoStream,
};
use crate::render::{AudioPlayer, DecoderFactory, Recorder, RenderTarget, VideoDecoder};
use crate::session::rotation::{ListenerId, Rotation, RotationTracker};
use crate::stream::{
    parser_for, run_pipeline, ConfigurationParser, DataPacket, MediaPacket, StreamConsumer,
    StreamDemuxer,
};
use crate::transport::{BoxReader, BoxWriter};

type DecoderSlot = Arc<Mutex<Option<Box<dyn VideoDecoder>>>>;
type SharedRecorder = Arc<Mutex<Box<dyn Recorder>>>;

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where the server binary is read from on each start
#[derive(Debug, Clone)]
pub enum ServerBinary {
    /// Read from a local file
    File(PathBuf),
    /// Already in memory
    Memory(Bytes),
}

impl ServerBinary {
    async fn load(&self) -> std::io::Result<Bytes> {
        match self {
            ServerBinary::File(path) => tokio::fs::read(path).await.map(Bytes::from),
            ServerBinary::Memory(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server options; a fresh instance id is drawn on every start
    pub server: ServerOptions,
    /// Server binary source
    pub binary: ServerBinary,
    /// Border kept around the surface, in pixels
    pub border_inset: f64,
}

impl SessionConfig {
    /// Builds session settings from the loaded configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            server: ServerOptions::from_config(&config.video, &config.server),
            binary: ServerBinary::File(config.server.local_path.clone()),
            border_inset: f64::from(config.video.border_inset),
        }
    }

    /// Sets the server binary source
    pub fn with_binary(mut self, binary: ServerBinary) -> Self {
        self.binary = binary;
        self
    }

    /// Sets the border inset
    pub fn with_border_inset(mut self, border_inset: f64) -> Self {
        self.border_inset = border_inset;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Throughput figures for a session
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionMetrics {
    /// Payload bytes received since start
    pub total_bytes: u64,
    /// Data packets received since start
    pub frames: u64,
    /// Frames per second over the last sample window
    pub fps: f64,
    /// Bits per second over the last sample window
    pub bit_rate: f64,
}

struct MetricsSample {
    at: Instant,
    bytes: u64,
    frames: u64,
    fps: f64,
    bit_rate: f64,
}

impl MetricsSample {
    fn fresh() -> Self {
        Self {
            at: Instant::now(),
            bytes: 0,
            frames: 0,
            fps: 0.0,
            bit_rate: 0.0,
        }
    }
}

struct MetricsCounters {
    bytes: AtomicU64,
    frames: AtomicU64,
    sample: Mutex<MetricsSample>,
}

impl MetricsCounters {
    fn new() -> Self {
        Self {
            bytes: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            sample: Mutex::new(MetricsSample::fresh()),
        }
    }

    fn record(&self, payload_len: usize) {
        self.bytes.fetch_add(payload_len as u64, Ordering::Relaxed);
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SessionMetrics {
        let sample = lock(&self.sample);
        SessionMetrics {
            total_bytes: self.bytes.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            fps: sample.fps,
            bit_rate: sample.bit_rate,
        }
    }

    fn sample(&self) -> SessionMetrics {
        let mut sample = lock(&self.sample);
        let now = Instant::now();
        let bytes = self.bytes.load(Ordering::Relaxed);
        let frames = self.frames.load(Ordering::Relaxed);

        let elapsed = now.duration_since(sample.at).as_secs_f64();
        if elapsed > 0.0 {
            sample.fps = frames.saturating_sub(sample.frames) as f64 / elapsed;
            sample.bit_rate = bytes.saturating_sub(sample.bytes) as f64 * 8.0 / elapsed;
        }
        sample.at = now;
        sample.bytes = bytes;
        sample.frames = frames;

        SessionMetrics {
            total_bytes: bytes,
            frames,
            fps: sample.fps,
            bit_rate: sample.bit_rate,
        }
    }

    fn reset(&self) {
        let mut sample = lock(&self.sample);
        self.bytes.store(0, Ordering::Relaxed);
        self.frames.store(0, Ordering::Relaxed);
        *sample = MetricsSample::fresh();
    }
}

#[derive(Default)]
struct SessionState {
    serial: Option<String>,
    device: Option<Arc<dyn MirrorDevice>>,
    client: Option<Arc<dyn MirrorClient>>,
    render_target: Option<Arc<dyn RenderTarget>>,
    input: Option<InputInjector>,
    audio: Option<Box<dyn AudioPlayer>>,
    tasks: Vec<JoinHandle<()>>,
    logger: Option<ListenerId>,
}

struct SessionInner {
    id: String,
    config: SessionConfig,
    decoder_factory: Arc<dyn DecoderFactory>,
    decoder: DecoderSlot,
    recorder: Mutex<Option<SharedRecorder>>,
    state: Mutex<SessionState>,
    rotation: RotationTracker,
    width: AtomicU32,
    height: AtomicU32,
    running: AtomicBool,
    connecting: AtomicBool,
    fullscreen: AtomicBool,
    epoch: AtomicU64,
    metrics: MetricsCounters,
    layout: watch::Sender<Option<SurfaceLayout>>,
}

fn log_rotation(rotation: Rotation, previous: Rotation) -> Result<(), ListenerError> {
    info!("Screen rotated from {} to {}", previous, rotation);
    Ok(())
}

impl SessionInner {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        lock(&self.state)
    }

    fn check_epoch(&self, epoch: u64) -> Result<(), StartError> {
        if self.epoch.load(Ordering::SeqCst) == epoch {
            Ok(())
        } else {
            Err(StartError::Cancelled)
        }
    }

    fn video_size(&self) -> (u32, u32) {
        (
            self.width.load(Ordering::SeqCst),
            self.height.load(Ordering::SeqCst),
        )
    }

    fn set_video_size(&self, width: u32, height: u32) {
        let previous = self.video_size();
        if previous == (width, height) {
            return;
        }
        self.width.store(width, Ordering::SeqCst);
        self.height.store(height, Ordering::SeqCst);
        info!(
            "Video size changed: {}x{} -> {}x{}",
            previous.0, previous.1, width, height
        );
        self.relayout();
    }

    fn release_decoder(&self) {
        let decoder = lock(&self.decoder).take();
        if let Some(mut decoder) = decoder {
            decoder.release();
        }
    }

    fn relayout(&self) {
        let target = self.state().render_target.clone();
        let Some(target) = target else {
            return;
        };

        let device = Size::from(self.video_size());
        if let Some(layout) = compute_layout(
            target.container_size(),
            device,
            self.rotation.rotation(),
            self.config.border_inset,
        ) {
            debug!(
                "Layout {:.1}x{:.1} rotated {}°",
                layout.width,
                layout.height,
                layout.rotation_degrees()
            );
            target.apply_layout(&layout);
            self.layout.send_replace(Some(layout));
        }
    }

    fn dispose_if_current(&self, epoch: u64) {
        if self.epoch.load(Ordering::SeqCst) == epoch {
            self.dispose();
        }
    }

    fn dispose(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);

        // Detach under the lock and release after it is dropped, so that
        // callbacks may re-enter the session
        let (input, audio, render_target, client, device, tasks, was_running) = {
            let mut state = self.state();
            state.serial = None;
            state.logger = None;
            let was_running = self.running.swap(false, Ordering::SeqCst);
            self.connecting.store(false, Ordering::SeqCst);
            (
                state.input.take(),
                state.audio.take(),
                state.render_target.take(),
                state.client.take(),
                state.device.take(),
                std::mem::take(&mut state.tasks),
                was_running,
            )
        };

        self.release_decoder();

        if let Some(input) = input {
            input.dispose();
        }

        if let Some(mut audio) = audio {
            audio.stop();
        }

        self.metrics.reset();

        if self.fullscreen.swap(false, Ordering::SeqCst) {
            if let Some(target) = &render_target {
                target.exit_fullscreen();
            }
        }

        drop((render_target, client, device));
        for task in tasks {
            task.abort();
        }

        self.rotation.clear_listeners();

        if was_running {
            info!("Session {} disposed", self.id);
        } else {
            debug!("Session {} disposed", self.id);
        }
    }
}

/// Updates session state from the stream
struct SessionUpdater {
    session: Weak<SessionInner>,
    parser: Box<dyn ConfigurationParser>,
}

impl StreamConsumer for SessionUpdater {
    fn on_configuration(&mut self, data: &Bytes) {
        let Some(inner) = self.session.upgrade() else {
            return;
        };

        match self.parser.parse(data) {
            Ok(size) if size.width > 0 && size.height > 0 => {
                inner.set_video_size(size.width, size.height);
            }
            Ok(size) => debug!("Ignoring empty frame size {}x{}", size.width, size.height),
            Err(e) => warn!("Failed to parse configuration packet: {}", e),
        }
    }

    fn on_data(&mut self, packet: &DataPacket) {
        let Some(inner) = self.session.upgrade() else {
            return;
        };

        if let Some(value) = packet.rotation {
            match Rotation::try_from(value) {
                Ok(rotation) => {
                    if inner.rotation.set_rotation(rotation).is_some() {
                        inner.relayout();
                    }
                }
                Err(e) => debug!("Ignoring orientation metadata: {}", e),
            }
        }

        inner.metrics.record(packet.payload.len());
    }
}

/// Feeds the currently bound decoder
struct DecoderSink {
    slot: DecoderSlot,
}

impl DecoderSink {
    fn write(&self, packet: &MediaPacket) {
        if let Some(decoder) = lock(&self.slot).as_mut() {
            if let Err(e) = decoder.write(packet) {
                warn!("Decoder rejected packet: {}", e);
            }
        }
    }
}

impl StreamConsumer for DecoderSink {
    fn on_configuration(&mut self, data: &Bytes) {
        self.write(&MediaPacket::Configuration { data: data.clone() });
    }

    fn on_data(&mut self, packet: &DataPacket) {
        self.write(&MediaPacket::Data(packet.clone()));
    }
}

/// Hands every unit to the recorder
struct RecorderSink {
    recorder: SharedRecorder,
}

impl RecorderSink {
    fn write(&self, packet: &MediaPacket) {
        if let Err(e) = lock(&self.recorder).add_video_packet(packet) {
            warn!("Failed to record packet: {}", e);
        }
    }
}

impl StreamConsumer for RecorderSink {
    fn on_configuration(&mut self, data: &Bytes) {
        self.write(&MediaPacket::Configuration { data: data.clone() });
    }

    fn on_data(&mut self, packet: &DataPacket) {
        self.write(&MediaPacket::Data(packet.clone()));
    }
}

async fn forward_server_output(stdout: BoxReader) {
    let mut lines = FramedRead::new(stdout, LinesCodec::new());
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => info!(target: SERVER_LOG_TARGET, "{}", line),
            Err(e) => {
                debug!("Server output ended: {}", e);
                break;
            }
        }
    }
}

/// Controller for one mirroring session
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct MirrorSession {
    inner: Arc<SessionInner>,
}

impl MirrorSession {
    /// Creates an idle session
    pub fn new(config: SessionConfig, decoder_factory: Arc<dyn DecoderFactory>) -> Self {
        let (layout, _) = watch::channel(None);
        let inner = Arc::new(SessionInner {
            id: Uuid::new_v4().to_string(),
            config,
            decoder_factory,
            decoder: Arc::new(Mutex::new(None)),
            recorder: Mutex::new(None),
            state: Mutex::new(SessionState::default()),
            rotation: RotationTracker::new(),
            width: AtomicU32::new(0),
            height: AtomicU32::new(0),
            running: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            fullscreen: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            metrics: MetricsCounters::new(),
            layout,
        });

        inner.state().logger = Some(inner.rotation.add_listener(log_rotation));
        Self { inner }
    }

    /// Unique session id
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Serial of the device while running
    pub fn serial(&self) -> Option<String> {
        self.inner.state().serial.clone()
    }

    /// Records every unit of future starts
    pub fn set_recorder(&self, recorder: Box<dyn Recorder>) {
        *lock(&self.inner.recorder) = Some(Arc::new(Mutex::new(recorder)));
    }

    /// Binds a render target, replacing the decoder of any previous one
    ///
    /// # Errors
    ///
    /// Returns the factory's error; the session is then left without a
    /// decoder and `start` fails with `StartError::MissingDecoder`
    pub fn bind_render_target(&self, target: Arc<dyn RenderTarget>) -> Result<(), RenderError> {
        self.inner.release_decoder();
        self.inner.state().render_target = Some(target.clone());

        let decoder = self
            .inner
            .decoder_factory
            .create(self.inner.config.server.video_codec, target.as_ref())?;
        *lock(&self.inner.decoder) = Some(decoder);

        self.inner.relayout();
        Ok(())
    }

    /// Recomputes the layout, e.g. after the container was resized
    pub fn relayout(&self) {
        self.inner.relayout();
    }

    /// Starts mirroring `device`
    ///
    /// # Errors
    ///
    /// On any failure the session is disposed before the error is returned,
    /// except for `AlreadyRunning` and `Cancelled`, where a concurrent call
    /// owns the teardown.
    pub async fn start(
        &self,
        device: Option<Arc<dyn MirrorDevice>>,
    ) -> Result<ClientHandle, StartError> {
        if self.is_running() || self.inner.connecting.swap(true, Ordering::SeqCst) {
            return Err(StartError::AlreadyRunning);
        }

        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        match self.start_inner(device, epoch).await {
            Ok(handle) => Ok(handle),
            Err(StartError::Cancelled) => {
                info!("Start of session {} cancelled", self.inner.id);
                Err(StartError::Cancelled)
            }
            Err(e) => {
                error!("Failed to start session {}: {}", self.inner.id, e);
                self.inner.connecting.store(false, Ordering::SeqCst);
                self.inner.dispose();
                Err(e)
            }
        }
    }

    async fn start_inner(
        &self,
        device: Option<Arc<dyn MirrorDevice>>,
        epoch: u64,
    ) -> Result<ClientHandle, StartError> {
        let inner = &self.inner;

        let device = device.ok_or(StartError::MissingDevice)?;
        if inner.state().render_target.is_none() {
            return Err(StartError::MissingRenderTarget);
        }
        if lock(&inner.decoder).is_none() {
            return Err(StartError::MissingDecoder);
        }

        info!(
            "Starting session {} on device {}",
            inner.id,
            device.serial()
        );

        let binary = inner
            .config
            .binary
            .load()
            .await
            .map_err(|e| StartError::ServerBinary(e.to_string()))?;
        inner.check_epoch(epoch)?;

        let options = inner.config.server.clone().with_scid(InstanceId::random());
        debug!("Pushing server ({} bytes) to {}", binary.len(), options.remote_path);
        device
            .push_server(binary, &options.remote_path)
            .await
            .map_err(|e| StartError::ServerPush(e.to_string()))?;
        inner.check_epoch(epoch)?;

        let mut client = device.start_client(&options).await?;
        let video = client.take_video_stream();
        let control = client.take_control();
        let stdout = client.take_stdout();
        let client: Arc<dyn MirrorClient> = Arc::from(client);

        let committed = match video {
            Some(video) => self.commit(epoch, device, client.clone(), video, control, stdout),
            None => Err(StartError::ClientStart(
                "server did not open a video stream".to_string(),
            )),
        };

        match committed {
            Ok(handle) => {
                inner.relayout();
                Ok(handle)
            }
            Err(e) => {
                if let Err(close_error) = client.close().await {
                    warn!("Failed to close abandoned client: {}", close_error);
                }
                Err(e)
            }
        }
    }

    /// Publishes a started client; runs under the state lock so a racing
    /// dispose either sees everything or nothing
    fn commit(
        &self,
        epoch: u64,
        device: Arc<dyn MirrorDevice>,
        client: Arc<dyn MirrorClient>,
        video: VideoStream,
        control: Option<BoxWriter>,
        stdout: Option<BoxReader>,
    ) -> Result<ClientHandle, StartError> {
        let inner = &self.inner;
        let mut state = inner.state();
        inner.check_epoch(epoch)?;

        let metadata = video.metadata;
        let serial = device.serial().to_string();

        inner.width.store(metadata.width, Ordering::SeqCst);
        inner.height.store(metadata.height, Ordering::SeqCst);
        inner.rotation.reset();

        let recorder = lock(&inner.recorder).clone();
        if let Some(recorder) = &recorder {
            lock(recorder).set_video_metadata(&metadata);
        }

        match control {
            Some(control) => state.input = Some(InputInjector::new(control)),
            None => warn!("Server did not open a control channel; input is disabled"),
        }

        if state.logger.is_none() {
            state.logger = Some(inner.rotation.add_listener(log_rotation));
        }

        let weak = Arc::downgrade(inner);
        state
            .tasks
            .push(spawn_pipeline(weak.clone(), video, recorder, inner.decoder.clone(), epoch));
        state.tasks.push(spawn_exit_watcher(weak, client.clone(), epoch));
        if let Some(stdout) = stdout {
            state.tasks.push(tokio::spawn(forward_server_output(stdout)));
        }

        let exited = client.exited();
        state.serial = Some(serial.clone());
        state.device = Some(device);
        state.client = Some(client);

        inner.running.store(true, Ordering::SeqCst);
        inner.connecting.store(false, Ordering::SeqCst);

        info!(
            "Session {} running: {} {}x{}",
            inner.id, metadata.codec, metadata.width, metadata.height
        );

        Ok(ClientHandle {
            session_id: inner.id.clone(),
            serial,
            video: Some(metadata),
            exited,
        })
    }

    /// Closes the remote client, then disposes
    ///
    /// A failing close is logged and not retried.
    pub async fn stop(&self) {
        let client = self.inner.state().client.clone();
        if let Some(client) = client {
            info!("Stopping session {}", self.inner.id);
            if let Err(e) = client.close().await {
                warn!("Failed to close mirroring client: {}", e);
            }
        }
        self.dispose();
    }

    /// Releases every resource of the session; safe to call repeatedly
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// True between a successful start and dispose
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// True while a start is in flight
    pub fn is_connecting(&self) -> bool {
        self.inner.connecting.load(Ordering::SeqCst)
    }

    /// Frame size before rotation; zero until the first metadata
    pub fn video_size(&self) -> (u32, u32) {
        self.inner.video_size()
    }

    /// Frame size as displayed, with sides exchanged for odd rotations
    pub fn rotated_size(&self) -> (u32, u32) {
        let (width, height) = self.video_size();
        if self.rotation().swaps_axes() {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// Current device rotation
    pub fn rotation(&self) -> Rotation {
        self.inner.rotation.rotation()
    }

    /// Totals and the last sampled rates
    pub fn metrics(&self) -> SessionMetrics {
        self.inner.metrics.snapshot()
    }

    /// Computes rates since the previous sample
    pub fn sample_metrics(&self) -> SessionMetrics {
        self.inner.metrics.sample()
    }

    /// Last computed layout
    pub fn layout(&self) -> Option<SurfaceLayout> {
        *self.inner.layout.borrow()
    }

    /// Receiver notified on every layout change
    pub fn subscribe_layout(&self) -> watch::Receiver<Option<SurfaceLayout>> {
        self.inner.layout.subscribe()
    }

    /// Records full-screen state; leaving it asks the target to exit
    pub fn set_fullscreen(&self, fullscreen: bool) {
        let was = self.inner.fullscreen.swap(fullscreen, Ordering::SeqCst);
        if was && !fullscreen {
            let target = self.inner.state().render_target.clone();
            if let Some(target) = target {
                target.exit_fullscreen();
            }
        }
    }

    /// True while full-screen
    pub fn is_fullscreen(&self) -> bool {
        self.inner.fullscreen.load(Ordering::SeqCst)
    }

    /// Attaches an audio player; a previous one is stopped
    pub fn attach_audio_player(&self, player: Box<dyn AudioPlayer>) {
        let previous = self.inner.state().audio.replace(player);
        if let Some(mut previous) = previous {
            previous.stop();
        }
    }

    /// Registers a rotation listener, called with `(new, previous)`
    pub fn add_rotation_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Rotation, Rotation) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.inner.rotation.add_listener(listener)
    }

    /// Unregisters a rotation listener
    pub fn remove_rotation_listener(&self, id: ListenerId) -> bool {
        self.inner.rotation.remove_listener(id)
    }

    /// Maps a viewport position to device pixels
    ///
    /// Returns `None` when no render target is bound.
    pub fn client_to_device(&self, x: f64, y: f64) -> Option<DevicePoint> {
        let target = self.inner.state().render_target.clone()?;
        Some(map_to_device(
            x,
            y,
            target.surface_rect(),
            self.rotation(),
            Size::from(self.video_size()),
        ))
    }

    /// Input injector while running
    pub fn input(&self) -> Option<InputInjector> {
        self.inner.state().input.clone()
    }

    /// Maps a viewport position and injects a touch there
    pub fn inject_touch(&self, action: MotionAction, x: f64, y: f64) -> Result<(), InputError> {
        let input = self.input().ok_or(InputError::Disposed)?;
        let point = self.client_to_device(x, y).unwrap_or_default();
        let (width, height) = self.video_size();

        input.touch(
            action,
            Position::new(
                point.x.round() as i32,
                point.y.round() as i32,
                u16::try_from(width).unwrap_or(u16::MAX),
                u16::try_from(height).unwrap_or(u16::MAX),
            ),
        )
    }
}

fn spawn_pipeline(
    session: Weak<SessionInner>,
    video: VideoStream,
    recorder: Option<SharedRecorder>,
    decoder: DecoderSlot,
    epoch: u64,
) -> JoinHandle<()> {
    let mut demuxer = StreamDemuxer::new()
        .with_consumer(SessionUpdater {
            session: session.clone(),
            parser: parser_for(video.metadata.codec),
        })
        .with_consumer(DecoderSink { slot: decoder });
    if let Some(recorder) = recorder {
        demuxer = demuxer.with_consumer(RecorderSink { recorder });
    }

    tokio::spawn(async move {
        let guard = PipelineGuard {
            session: session.clone(),
            epoch,
            finished: false,
        };
        if let Err(e) = run_pipeline(video.packets, demuxer).await {
            error!("Video stream failed: {}", e);
            if let Some(inner) = session.upgrade() {
                inner.dispose_if_current(epoch);
            }
        }
        guard.finish();
    })
}

/// Disposes the session if the pipeline task ends without finishing,
/// e.g. when a consumer panics
struct PipelineGuard {
    session: Weak<SessionInner>,
    epoch: u64,
    finished: bool,
}

impl PipelineGuard {
    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(inner) = self.session.upgrade() {
            if inner.epoch.load(Ordering::SeqCst) == self.epoch {
                error!("Video pipeline of session {} stopped unexpectedly", inner.id);
                inner.dispose();
            }
        }
    }
}

fn spawn_exit_watcher(
    session: Weak<SessionInner>,
    client: Arc<dyn MirrorClient>,
    epoch: u64,
) -> JoinHandle<()> {
    let exited = client.exited();
    drop(client);

    tokio::spawn(async move {
        exited.cancelled().await;
        if let Some(inner) = session.upgrade() {
            info!("Mirroring server for session {} exited", inner.id);
            inner.dispose_if_current(epoch);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeParseError;
    use crate::geometry::Rect;
    use crate::render::{HeadlessSurface, NullDecoderFactory};
    use crate::stream::CroppedSize;
    use std::sync::OnceLock;
    use tokio::io::AsyncWriteExt;

    fn session() -> (MirrorSession, Arc<NullDecoderFactory>) {
        let factory = Arc::new(NullDecoderFactory::new());
        let config = SessionConfig::default().with_binary(ServerBinary::Memory(Bytes::new()));
        (MirrorSession::new(config, factory.clone()), factory)
    }

    #[tokio::test]
    async fn test_start_without_device_disposes() {
        let (session, factory) = session();
        session
            .bind_render_target(Arc::new(HeadlessSurface::new(800.0, 600.0)))
            .unwrap();

        let result = session.start(None).await;
        assert!(matches!(result, Err(StartError::MissingDevice)));
        assert!(!session.is_running());
        assert!(!session.is_connecting());
        assert!(factory.decoders()[0].is_released());
    }

    #[test]
    fn test_bind_replaces_decoder() {
        let (session, factory) = session();
        let surface = Arc::new(HeadlessSurface::new(800.0, 600.0));

        session.bind_render_target(surface.clone()).unwrap();
        session.bind_render_target(surface).unwrap();

        let decoders = factory.decoders();
        assert_eq!(decoders.len(), 2);
        assert!(decoders[0].is_released());
        assert!(!decoders[1].is_released());
    }

    #[test]
    fn test_layout_waits_for_video_size() {
        let (session, _) = session();
        let surface = Arc::new(HeadlessSurface::new(800.0, 600.0));
        session.bind_render_target(surface.clone()).unwrap();

        assert!(session.layout().is_none());
        assert_eq!(surface.layouts_applied(), 0);

        session.inner.set_video_size(1080, 2400);
        let layout = session.layout().unwrap();
        assert!((layout.height - 594.0).abs() < 1e-9);
        assert_eq!(surface.layouts_applied(), 1);
    }

    #[test]
    fn test_metrics_sampling() {
        let counters = MetricsCounters::new();
        counters.record(1000);
        counters.record(500);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.total_bytes, 1500);
        assert_eq!(snapshot.frames, 2);
        assert_eq!(snapshot.fps, 0.0);

        std::thread::sleep(std::time::Duration::from_millis(5));
        let sampled = counters.sample();
        assert!(sampled.fps > 0.0);
        assert!(sampled.bit_rate > 0.0);

        counters.reset();
        assert_eq!(counters.snapshot(), SessionMetrics::default());
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let (session, _) = session();
        session.set_fullscreen(true);
        session
            .bind_render_target(Arc::new(HeadlessSurface::new(10.0, 10.0)))
            .unwrap();

        session.dispose();
        session.dispose();
        assert!(!session.is_fullscreen());
        assert!(session.client_to_device(1.0, 1.0).is_none());
    }

    struct FixedParser(Result<CroppedSize, DecodeParseError>);

    impl ConfigurationParser for FixedParser {
        fn parse(&self, _data: &[u8]) -> Result<CroppedSize, DecodeParseError> {
            self.0.clone()
        }
    }

    fn updater(
        session: &MirrorSession,
        size: Result<CroppedSize, DecodeParseError>,
    ) -> SessionUpdater {
        SessionUpdater {
            session: Arc::downgrade(&session.inner),
            parser: Box::new(FixedParser(size)),
        }
    }

    fn data_packet(rotation: Option<u8>) -> DataPacket {
        DataPacket {
            pts: 1,
            key_frame: false,
            payload: Bytes::from_static(&[0, 0, 0, 1, 0x41]),
            rotation,
        }
    }

    #[test]
    fn test_empty_or_invalid_configuration_keeps_size() {
        let (session, _) = session();
        session.inner.set_video_size(1080, 2400);
        let config = Bytes::from_static(&[0, 0, 0, 1, 0x67]);

        updater(&session, Ok(CroppedSize { width: 0, height: 0 })).on_configuration(&config);
        assert_eq!(session.video_size(), (1080, 2400));

        updater(&session, Ok(CroppedSize { width: 720, height: 0 })).on_configuration(&config);
        assert_eq!(session.video_size(), (1080, 2400));

        updater(&session, Err(DecodeParseError::MissingSps)).on_configuration(&config);
        assert_eq!(session.video_size(), (1080, 2400));

        updater(&session, Ok(CroppedSize { width: 720, height: 1280 })).on_configuration(&config);
        assert_eq!(session.video_size(), (720, 1280));
    }

    #[test]
    fn test_out_of_range_rotation_is_ignored() {
        let (session, _) = session();
        let mut updater = updater(&session, Err(DecodeParseError::MissingSps));

        updater.on_data(&data_packet(Some(3)));
        assert_eq!(session.rotation(), Rotation::ROTATION_270);

        updater.on_data(&data_packet(Some(4)));
        updater.on_data(&data_packet(Some(200)));
        assert_eq!(session.rotation(), Rotation::ROTATION_270);

        updater.on_data(&data_packet(None));
        assert_eq!(session.rotation(), Rotation::ROTATION_270);
        assert_eq!(session.metrics().frames, 4);
    }

    /// Render target that calls back into its session when leaving full-screen
    struct ReentrantTarget {
        session: OnceLock<MirrorSession>,
        exits: AtomicU32,
    }

    impl RenderTarget for ReentrantTarget {
        fn container_size(&self) -> Size {
            Size::new(800.0, 600.0)
        }

        fn surface_rect(&self) -> Rect {
            Rect::new(0.0, 0.0, 800.0, 600.0)
        }

        fn apply_layout(&self, _layout: &SurfaceLayout) {}

        fn exit_fullscreen(&self) {
            self.exits.fetch_add(1, Ordering::SeqCst);
            if let Some(session) = self.session.get() {
                session.relayout();
                assert!(session.client_to_device(10.0, 10.0).is_none());
                assert!(!session.is_running());
            }
        }
    }

    #[test]
    fn test_dispose_allows_reentrant_callbacks() {
        let (session, factory) = session();
        let target = Arc::new(ReentrantTarget {
            session: OnceLock::new(),
            exits: AtomicU32::new(0),
        });
        let _ = target.session.set(session.clone());
        session.bind_render_target(target.clone()).unwrap();
        session.set_fullscreen(true);

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let disposing = session.clone();
        std::thread::spawn(move || {
            disposing.dispose();
            let _ = done_tx.send(());
        });

        done_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("dispose deadlocked");
        assert_eq!(target.exits.load(Ordering::SeqCst), 1);
        assert!(factory.decoders()[0].is_released());
    }

    struct PanickingDecoder;

    impl VideoDecoder for PanickingDecoder {
        fn write(&mut self, _packet: &MediaPacket) -> Result<(), RenderError> {
            panic!("decoder crashed");
        }

        fn release(&mut self) {}
    }

    #[tokio::test]
    async fn test_pipeline_panic_disposes_session() {
        let (session, _) = session();
        session.inner.running.store(true, Ordering::SeqCst);
        *lock(&session.inner.decoder) = Some(Box::new(PanickingDecoder));

        let (mut device_side, session_side) = tokio::io::duplex(1024);
        let video = VideoStream {
            metadata: crate::mirror::VideoMetadata {
                codec: crate::mirror::VideoCodec::H264,
                width: 1080,
                height: 2400,
            },
            packets: Box::pin(session_side),
        };
        let epoch = session.inner.epoch.load(Ordering::SeqCst);
        let task = spawn_pipeline(
            Arc::downgrade(&session.inner),
            video,
            None,
            session.inner.decoder.clone(),
            epoch,
        );

        let mut frame = Vec::new();
        frame.extend_from_slice(&1u64.to_be_bytes());
        frame.extend_from_slice(&5u32.to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0, 1, 0x41]);
        device_side.write_all(&frame).await.unwrap();

        let result = task.await;
        assert!(result.unwrap_err().is_panic());
        assert!(!session.is_running());
        assert_eq!(session.inner.epoch.load(Ordering::SeqCst), epoch + 1);
    }
}
