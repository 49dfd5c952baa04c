//! Session manager for coordinating mirroring sessions
//!
//! This module provides a central registry of running sessions, keyed by
//! device serial, with at most one session per device.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{SessionError, SessionResult};
use crate::mirror::{ClientHandle, MirrorDevice};
use crate::render::{DecoderFactory, Recorder, RenderTarget};
use crate::session::controller::{MirrorSession, SessionConfig};

/// Creates recorders for new sessions
pub type RecorderFactory = Arc<dyn Fn(&str) -> Option<Box<dyn Recorder>> + Send + Sync>;

/// Registry of sessions by device serial
pub struct SessionManager {
    /// Active sessions
    sessions: Arc<RwLock<HashMap<String, MirrorSession>>>,
    /// Template for new sessions
    config: SessionConfig,
    /// Decoder factory handed to every session
    decoder_factory: Arc<dyn DecoderFactory>,
    /// Optional recorder per session
    recorder_factory: Option<RecorderFactory>,
    /// Message of the most recent failure
    last_error: Mutex<Option<String>>,
}

impl SessionManager {
    /// Creates an empty manager
    pub fn new(config: SessionConfig, decoder_factory: Arc<dyn DecoderFactory>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config,
            decoder_factory,
            recorder_factory: None,
            last_error: Mutex::new(None),
        }
    }

    /// Attaches a recorder, created per serial, to every new session
    pub fn with_recorder_factory(mut self, factory: RecorderFactory) -> Self {
        self.recorder_factory = Some(factory);
        self
    }

    fn record_error(&self, message: String) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(message);
    }

    /// Creates a session for `device`, binds `target` and starts it
    ///
    /// # Errors
    ///
    /// Returns `SessionAlreadyExists` if the device already has a running
    /// session, or the start error; failures are also kept in
    /// [`SessionManager::last_error`]
    pub async fn add_connection(
        &self,
        device: Arc<dyn MirrorDevice>,
        target: Arc<dyn RenderTarget>,
    ) -> SessionResult<ClientHandle> {
        let serial = device.serial().to_string();

        // A stopped session left in the map is replaced
        {
            let sessions = self.sessions.read().await;
            if let Some(existing) = sessions.get(&serial) {
                if existing.is_running() || existing.is_connecting() {
                    let error = SessionError::SessionAlreadyExists(serial);
                    self.record_error(error.to_string());
                    return Err(error);
                }
            }
        }

        let session = MirrorSession::new(self.config.clone(), self.decoder_factory.clone());
        if let Some(factory) = &self.recorder_factory {
            if let Some(recorder) = factory(&serial) {
                session.set_recorder(recorder);
            }
        }
        if let Err(e) = session.bind_render_target(target) {
            warn!("Failed to bind render target for {}: {}", serial, e);
        }

        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(serial.clone(), session.clone());
        }

        match session.start(Some(device)).await {
            Ok(handle) => {
                self.clear_error();
                info!("Added connection: {}", serial);
                Ok(handle)
            }
            Err(e) => {
                self.record_error(e.to_string());
                let mut sessions = self.sessions.write().await;
                if sessions
                    .get(&serial)
                    .map_or(false, |current| current.id() == session.id())
                {
                    sessions.remove(&serial);
                }
                Err(SessionError::Start(e))
            }
        }
    }

    /// Stops and removes the session for `serial`
    pub async fn remove_connection(&self, serial: &str) -> SessionResult<()> {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions
                .remove(serial)
                .ok_or_else(|| SessionError::SessionNotFound(serial.to_string()))?
        };

        session.stop().await;
        info!("Removed connection: {}", serial);
        Ok(())
    }

    /// Returns the session for `serial`
    pub async fn get(&self, serial: &str) -> Option<MirrorSession> {
        self.sessions.read().await.get(serial).cloned()
    }

    /// True while the device has a running session
    pub async fn is_device_streaming(&self, serial: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(serial)
            .map_or(false, MirrorSession::is_running)
    }

    /// Serials with a session
    pub async fn serials(&self) -> Vec<String> {
        let mut serials: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        serials.sort();
        serials
    }

    /// Returns the number of sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Stops and removes all sessions
    pub async fn stop_all(&self) {
        let sessions: Vec<(String, MirrorSession)> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().collect()
        };

        for (serial, session) in sessions {
            session.stop().await;
            info!("Stopped session for {}", serial);
        }
    }

    /// Message of the most recent failure, if any
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forgets the last failure
    pub fn clear_error(&self) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}
