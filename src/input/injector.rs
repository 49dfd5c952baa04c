//! Input injection over the control socket
//!
//! Events are queued on a bounded channel and written by a background task,
//! so callers on the UI side never wait on the socket.

use futures::SinkExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::InputError;
use crate::input::codec::ControlMessageCodec;
use crate::input::types::{
    AndroidKeycode, ControlMessage, KeyAction, MotionAction, Position,
};
use crate::transport::BoxWriter;

/// Events buffered ahead of the writer task
const DEFAULT_QUEUE_SIZE: usize = 256;

/// Sends control messages to the device
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct InputInjector {
    sender: mpsc::Sender<ControlMessage>,
    shutdown: CancellationToken,
    events_sent: Arc<AtomicU64>,
    events_dropped: Arc<AtomicU64>,
}

impl InputInjector {
    /// Spawns the writer task on the control channel
    pub fn new(control: BoxWriter) -> Self {
        Self::with_queue_size(control, DEFAULT_QUEUE_SIZE)
    }

    /// Same as [`InputInjector::new`] with a custom queue bound
    pub fn with_queue_size(control: BoxWriter, queue_size: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_size);
        let shutdown = CancellationToken::new();
        let events_sent = Arc::new(AtomicU64::new(0));

        tokio::spawn(write_loop(
            control,
            receiver,
            shutdown.clone(),
            events_sent.clone(),
        ));

        Self {
            sender,
            shutdown,
            events_sent,
            events_dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queues a message without waiting
    ///
    /// # Errors
    ///
    /// Returns `InputError::QueueFull` if the writer is behind, or
    /// `InputError::Disposed` after [`InputInjector::dispose`]
    pub fn inject(&self, message: ControlMessage) -> Result<(), InputError> {
        if self.shutdown.is_cancelled() {
            return Err(InputError::Disposed);
        }

        trace!("Queue control message: {:?}", message.message_type());
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
                InputError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => InputError::Disposed,
        })
    }

    /// Queues a message, waiting for room in the queue
    pub async fn send(&self, message: ControlMessage) -> Result<(), InputError> {
        if self.shutdown.is_cancelled() {
            return Err(InputError::Disposed);
        }
        self.sender
            .send(message)
            .await
            .map_err(|_| InputError::Disposed)
    }

    /// Presses and releases a key
    pub fn press_key(&self, keycode: AndroidKeycode) -> Result<(), InputError> {
        self.inject(ControlMessage::keycode(KeyAction::Down, keycode))?;
        self.inject(ControlMessage::keycode(KeyAction::Up, keycode))
    }

    /// Single-finger touch at a device position
    pub fn touch(&self, action: MotionAction, position: Position) -> Result<(), InputError> {
        self.inject(ControlMessage::touch(action, position))
    }

    /// Scroll at a device position
    pub fn scroll(&self, position: Position, hscroll: f32, vscroll: f32) -> Result<(), InputError> {
        self.inject(ControlMessage::scroll(position, hscroll, vscroll))
    }

    /// Back key, or wake the screen
    pub fn back_or_screen_on(&self) -> Result<(), InputError> {
        self.inject(ControlMessage::back_or_screen_on(KeyAction::Down))?;
        self.inject(ControlMessage::back_or_screen_on(KeyAction::Up))
    }

    /// Stops the writer; queued messages not yet written are dropped
    pub fn dispose(&self) {
        if !self.shutdown.is_cancelled() {
            debug!("Disposing input injector");
            self.shutdown.cancel();
        }
    }

    /// True after [`InputInjector::dispose`]
    pub fn is_disposed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Messages written to the control socket
    pub fn events_sent(&self) -> u64 {
        self.events_sent.load(Ordering::Relaxed)
    }

    /// Messages rejected because the queue was full
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }
}

async fn write_loop(
    control: BoxWriter,
    mut receiver: mpsc::Receiver<ControlMessage>,
    shutdown: CancellationToken,
    events_sent: Arc<AtomicU64>,
) {
    let mut sink = FramedWrite::new(control, ControlMessageCodec);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            message = receiver.recv() => match message {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        warn!("Control channel write failed: {}", e);
                        shutdown.cancel();
                        break;
                    }
                    events_sent.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            },
        }
    }

    receiver.close();
    debug!("Input writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_messages_reach_control_socket() {
        let (writer, mut reader) = tokio::io::duplex(256);
        let injector = InputInjector::new(Box::pin(writer));

        injector.back_or_screen_on().unwrap();
        injector
            .touch(MotionAction::Down, Position::new(1, 2, 100, 200))
            .unwrap();

        let mut buf = [0u8; 4 + 32];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..4], &[4, 0, 4, 1]);
        assert_eq!(buf[4], 2);

        // counter is bumped after the write completes
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(injector.events_sent(), 3);
    }

    #[tokio::test]
    async fn test_inject_after_dispose_fails() {
        let (writer, _reader) = tokio::io::duplex(64);
        let injector = InputInjector::new(Box::pin(writer));

        injector.dispose();
        injector.dispose();
        assert!(injector.is_disposed());
        assert!(matches!(
            injector.press_key(AndroidKeycode::Home),
            Err(InputError::Disposed)
        ));
        assert!(matches!(
            injector
                .send(ControlMessage::back_or_screen_on(KeyAction::Down))
                .await,
            Err(InputError::Disposed)
        ));
    }

    #[tokio::test]
    async fn test_full_queue_reports_error() {
        // Nobody reads the socket, so the writer stalls on the first message
        let (writer, _reader) = tokio::io::duplex(1);
        let injector = InputInjector::with_queue_size(Box::pin(writer), 1);

        let mut full = false;
        for _ in 0..8 {
            if let Err(InputError::QueueFull) = injector.press_key(AndroidKeycode::Back) {
                full = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(full);
        assert!(injector.events_dropped() >= 1);
    }
}
