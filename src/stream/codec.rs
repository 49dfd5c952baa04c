//! Video socket framing
//!
//! After a 12-byte codec header (codec id, width, height; all u32 BE),
//! every unit is a 12-byte header followed by its payload:
//!
//! ```text
//! pts_and_flags:  u64 BE  (8)
//! length:         u32 BE  (4)
//! payload:        [u8]    (length)
//! ```
//!
//! Flag bits in `pts_and_flags`:
//!
//! ```text
//! 63      configuration packet
//! 62      key frame
//! 61      orientation present
//! 59..=60 orientation (quarter turns)
//! 0..=58  presentation timestamp (µs)
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::StreamError;
use crate::mirror::{VideoCodec, VideoMetadata};
use crate::stream::packet::{DataPacket, MediaPacket};

/// Size of a packet header
pub const HEADER_LEN: usize = 12;

/// Largest payload accepted from the device
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

const FLAG_CONFIG: u64 = 1 << 63;
const FLAG_KEY_FRAME: u64 = 1 << 62;
const FLAG_ORIENTATION: u64 = 1 << 61;
const ORIENTATION_SHIFT: u32 = 59;
const ORIENTATION_MASK: u64 = 0b11 << ORIENTATION_SHIFT;
const PTS_MASK: u64 = (1 << ORIENTATION_SHIFT) - 1;

/// Reads the codec header that precedes the packet stream
///
/// # Errors
///
/// Returns `StreamError::UnknownCodec` for codec ids other than H.264/H.265,
/// or an I/O error if the socket ends early
pub async fn read_video_metadata<R>(reader: &mut R) -> Result<VideoMetadata, StreamError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let codec_id = reader.read_u32().await?;
    let width = reader.read_u32().await?;
    let height = reader.read_u32().await?;

    let codec = VideoCodec::from_codec_id(codec_id).ok_or(StreamError::UnknownCodec(codec_id))?;

    Ok(VideoMetadata {
        codec,
        width,
        height,
    })
}

/// Frames and unframes media packets
#[derive(Debug, Clone)]
pub struct MediaStreamCodec {
    max_packet_size: usize,
}

impl Default for MediaStreamCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaStreamCodec {
    /// Creates a codec with the default size limit
    pub fn new() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
        }
    }

    /// Creates a codec with a custom size limit
    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }
}

/// Builds a packet from its header word, rejecting impossible flag mixes
fn packet_from_header(header: u64, payload: bytes::Bytes) -> Result<MediaPacket, StreamError> {
    if header & FLAG_CONFIG != 0 {
        if header & (FLAG_KEY_FRAME | FLAG_ORIENTATION) != 0 {
            return Err(StreamError::InvalidPacketKind(header));
        }
        return Ok(MediaPacket::Configuration { data: payload });
    }

    let rotation = (header & FLAG_ORIENTATION != 0)
        .then(|| ((header & ORIENTATION_MASK) >> ORIENTATION_SHIFT) as u8);

    Ok(MediaPacket::Data(DataPacket {
        pts: header & PTS_MASK,
        key_frame: header & FLAG_KEY_FRAME != 0,
        payload,
        rotation,
    }))
}

impl Decoder for MediaStreamCodec {
    type Item = MediaPacket;
    type Error = StreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; 8];
        header.copy_from_slice(&src[..8]);
        let header = u64::from_be_bytes(header);

        let mut length = [0u8; 4];
        length.copy_from_slice(&src[8..HEADER_LEN]);
        let length = u32::from_be_bytes(length) as usize;

        if length > self.max_packet_size {
            return Err(StreamError::PacketTooLarge {
                size: length,
                max: self.max_packet_size,
            });
        }

        if src.len() < HEADER_LEN + length {
            src.reserve(HEADER_LEN + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(length).freeze();
        packet_from_header(header, payload).map(Some)
    }
}

impl Encoder<MediaPacket> for MediaStreamCodec {
    type Error = StreamError;

    fn encode(&mut self, item: MediaPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_packet_size {
            return Err(StreamError::PacketTooLarge {
                size: item.len(),
                max: self.max_packet_size,
            });
        }

        let header = match &item {
            MediaPacket::Configuration { .. } => FLAG_CONFIG,
            MediaPacket::Data(packet) => {
                let mut header = packet.pts & PTS_MASK;
                if packet.key_frame {
                    header |= FLAG_KEY_FRAME;
                }
                if let Some(rotation) = packet.rotation {
                    header |= FLAG_ORIENTATION;
                    header |= (u64::from(rotation) << ORIENTATION_SHIFT) & ORIENTATION_MASK;
                }
                header
            }
        };

        dst.reserve(HEADER_LEN + item.len());
        dst.put_u64(header);
        dst.put_u32(item.len() as u32);
        dst.extend_from_slice(item.bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_packet(header: u64, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u64(header);
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_decode_configuration() {
        let mut codec = MediaStreamCodec::new();
        let mut buf = raw_packet(FLAG_CONFIG, &[0, 0, 0, 1, 0x67]);

        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet, MediaPacket::configuration(vec![0, 0, 0, 1, 0x67]));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_data_flags() {
        let mut codec = MediaStreamCodec::new();
        let header = FLAG_KEY_FRAME | FLAG_ORIENTATION | (2 << ORIENTATION_SHIFT) | 123_456;
        let mut buf = raw_packet(header, b"frame");

        match codec.decode(&mut buf).unwrap().unwrap() {
            MediaPacket::Data(packet) => {
                assert_eq!(packet.pts, 123_456);
                assert!(packet.key_frame);
                assert_eq!(packet.rotation, Some(2));
                assert_eq!(&packet.payload[..], b"frame");
            }
            other => panic!("expected data packet, got {:?}", other),
        }
    }

    #[test]
    fn test_orientation_absent_without_flag() {
        let mut codec = MediaStreamCodec::new();
        let mut buf = raw_packet(3 << ORIENTATION_SHIFT, b"x");

        match codec.decode(&mut buf).unwrap().unwrap() {
            MediaPacket::Data(packet) => assert_eq!(packet.rotation, None),
            other => panic!("expected data packet, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_input_waits() {
        let mut codec = MediaStreamCodec::new();
        let full = raw_packet(7, b"abcdef");

        let mut buf = BytesMut::from(&full[..5]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[5..14]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[14..]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_invalid_kind_is_fatal() {
        let mut codec = MediaStreamCodec::new();
        let mut buf = raw_packet(FLAG_CONFIG | FLAG_KEY_FRAME, b"??");
        assert!(matches!(
            codec.decode(&mut buf),
            Err(StreamError::InvalidPacketKind(_))
        ));
    }

    #[test]
    fn test_oversized_packet_rejected() {
        let mut codec = MediaStreamCodec::with_max_packet_size(4);
        let mut buf = raw_packet(0, b"too long");
        assert!(matches!(
            codec.decode(&mut buf),
            Err(StreamError::PacketTooLarge { size: 8, max: 4 })
        ));
    }

    #[test]
    fn test_encoder_matches_decoder_layout() {
        let mut codec = MediaStreamCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(MediaPacket::data_with_rotation(42, &b"abc"[..], 3), &mut buf)
            .unwrap();

        assert_eq!(buf.len(), HEADER_LEN + 3);
        let header = u64::from_be_bytes(buf[..8].try_into().unwrap());
        assert_eq!(header & PTS_MASK, 42);
        assert_ne!(header & FLAG_ORIENTATION, 0);
        assert_eq!((header & ORIENTATION_MASK) >> ORIENTATION_SHIFT, 3);
    }

    #[tokio::test]
    async fn test_read_video_metadata() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&VideoCodec::H264.codec_id().to_be_bytes());
        bytes.extend_from_slice(&1080u32.to_be_bytes());
        bytes.extend_from_slice(&2400u32.to_be_bytes());

        let metadata = read_video_metadata(&mut bytes.as_slice()).await.unwrap();
        assert_eq!(metadata.codec, VideoCodec::H264);
        assert_eq!((metadata.width, metadata.height), (1080, 2400));

        let mut bad = Vec::new();
        bad.extend_from_slice(&0xdead_beefu32.to_be_bytes());
        bad.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            read_video_metadata(&mut bad.as_slice()).await,
            Err(StreamError::UnknownCodec(0xdead_beef))
        ));
    }
}
