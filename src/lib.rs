//! DeviceMirror - Android screen mirroring session controller
//!
//! This library drives a mirroring server on an Android device through the
//! ADB server, including:
//! - Transports to the ADB server (plain TCP or a WebSocket bridge)
//! - Pushing and launching the server, and dialing its sockets
//! - Demultiplexing the video stream into decoder, recorder and state
//! - Tracking frame size and rotation and keeping the surface layout
//! - Injecting touch, scroll and key input back into the device
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use device_mirror::{
//!     adb::{AdbDevice, AdbServerClient},
//!     config::ConfigManager,
//!     logging,
//!     render::{HeadlessSurface, NullDecoderFactory},
//!     session::{MirrorSession, SessionConfig},
//!     transport::TcpConnector,
//! };
//!
//! # async fn run() -> device_mirror::Result<()> {
//! logging::init_default_logging();
//!
//! let config = ConfigManager::new()?.load_or_create_default()?;
//! let client = AdbServerClient::new(Arc::new(TcpConnector::local()));
//! let device = AdbDevice::new(client, "emulator-5554");
//!
//! let session = MirrorSession::new(
//!     SessionConfig::from_config(&config),
//!     Arc::new(NullDecoderFactory::new()),
//! );
//! session.bind_render_target(Arc::new(HeadlessSurface::new(1280.0, 720.0)))?;
//! let handle = session.start(Some(Arc::new(device))).await?;
//!
//! println!("Mirroring {} at {:?}", handle.serial, session.video_size());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adb;
pub mod config;
pub mod error;
pub mod geometry;
pub mod input;
pub mod logging;
pub mod mirror;
pub mod render;
pub mod session;
pub mod stream;
pub mod transport;

// Re-export commonly used types at crate root
pub use error::{MirrorError, Result};
pub use session::{MirrorSession, Rotation, SessionConfig, SessionManager};
