//! ADB server glue
//!
//! This module speaks the ADB host protocol over any [`Connector`]:
//! - Request framing, status replies and the `sync:` push records
//! - Host services: device listing, transport switch, shell, push
//! - A [`MirrorDevice`] that launches the server and dials its sockets
//!
//! [`Connector`]: crate::transport::Connector
//! [`MirrorDevice`]: crate::mirror::MirrorDevice

pub mod client;
pub mod device;
pub mod protocol;

pub use client::{parse_device_list, AdbServerClient, DeviceInfo};
pub use device::{AdbDevice, AdbMirrorClient, DEFAULT_TUNNEL_ATTEMPTS, DEFAULT_TUNNEL_RETRY_DELAY};
