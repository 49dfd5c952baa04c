//! Media stream module
//!
//! This module handles the video socket of a mirroring session:
//! - Packet framing and header flags
//! - Parsing codec configuration records for the cropped frame size
//! - Demultiplexing packets to the session's consumers

pub mod codec;
pub mod demux;
pub mod h264;
pub mod packet;

pub use codec::{read_video_metadata, MediaStreamCodec, MAX_PACKET_SIZE};
pub use demux::{run_pipeline, StreamConsumer, StreamDemuxer};
pub use h264::{parser_for, ConfigurationParser, CroppedSize, H264ConfigurationParser};
pub use packet::{DataPacket, MediaPacket, PacketKind};
