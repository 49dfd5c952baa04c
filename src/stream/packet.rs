//! Media stream packet types

use bytes::Bytes;

/// Which of the two packet kinds a unit is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Codec setup (SPS/PPS)
    Configuration,
    /// Encoded frame
    Data,
}

/// An encoded frame with its in-band metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// Presentation timestamp in microseconds
    pub pts: u64,
    /// True for key frames
    pub key_frame: bool,
    /// Encoded frame bytes
    pub payload: Bytes,
    /// Device orientation when the frame was captured, if reported
    pub rotation: Option<u8>,
}

/// One unit of the video stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaPacket {
    /// Codec configuration record
    Configuration {
        /// Raw configuration bytes
        data: Bytes,
    },
    /// Frame data
    Data(DataPacket),
}

impl MediaPacket {
    /// Creates a configuration packet
    pub fn configuration(data: impl Into<Bytes>) -> Self {
        MediaPacket::Configuration { data: data.into() }
    }

    /// Creates a data packet without orientation metadata
    pub fn data(pts: u64, key_frame: bool, payload: impl Into<Bytes>) -> Self {
        MediaPacket::Data(DataPacket {
            pts,
            key_frame,
            payload: payload.into(),
            rotation: None,
        })
    }

    /// Creates a data packet carrying an orientation value
    pub fn data_with_rotation(pts: u64, payload: impl Into<Bytes>, rotation: u8) -> Self {
        MediaPacket::Data(DataPacket {
            pts,
            key_frame: false,
            payload: payload.into(),
            rotation: Some(rotation),
        })
    }

    /// Returns the packet kind
    pub fn kind(&self) -> PacketKind {
        match self {
            MediaPacket::Configuration { .. } => PacketKind::Configuration,
            MediaPacket::Data(_) => PacketKind::Data,
        }
    }

    /// Returns the packet body
    pub fn bytes(&self) -> &Bytes {
        match self {
            MediaPacket::Configuration { data } => data,
            MediaPacket::Data(packet) => &packet.payload,
        }
    }

    /// Body length in bytes
    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    /// Returns true if the body is empty
    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }
}
