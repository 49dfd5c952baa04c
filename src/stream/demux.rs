//! Packet fan-out
//!
//! The demuxer reads one unit at a time from the video socket and hands it
//! to every registered consumer before reading the next.

use bytes::Bytes;
use futures::StreamExt;
use tokio_util::codec::FramedRead;
use tracing::{debug, trace};

use crate::error::StreamError;
use crate::stream::codec::MediaStreamCodec;
use crate::stream::packet::{DataPacket, MediaPacket};
use crate::transport::BoxReader;

/// Receives classified stream units
pub trait StreamConsumer: Send {
    /// Called for each configuration packet
    fn on_configuration(&mut self, data: &Bytes);

    /// Called for each data packet
    fn on_data(&mut self, packet: &DataPacket);
}

/// Delivers each unit to all consumers in registration order
#[derive(Default)]
pub struct StreamDemuxer {
    consumers: Vec<Box<dyn StreamConsumer>>,
}

impl StreamDemuxer {
    /// Creates a demuxer with no consumers
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a consumer
    pub fn with_consumer(mut self, consumer: impl StreamConsumer + 'static) -> Self {
        self.consumers.push(Box::new(consumer));
        self
    }

    /// Number of registered consumers
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Hands one unit to every consumer
    pub fn dispatch(&mut self, packet: &MediaPacket) {
        match packet {
            MediaPacket::Configuration { data } => {
                trace!("Configuration packet: {} bytes", data.len());
                for consumer in &mut self.consumers {
                    consumer.on_configuration(data);
                }
            }
            MediaPacket::Data(data) => {
                trace!(
                    "Data packet: pts={} key={} {} bytes",
                    data.pts,
                    data.key_frame,
                    data.payload.len()
                );
                for consumer in &mut self.consumers {
                    consumer.on_data(data);
                }
            }
        }
    }
}

/// Reads packets until the stream ends and dispatches each one
///
/// # Errors
///
/// Returns the first framing or I/O error; the stream is not read further
pub async fn run_pipeline(
    reader: BoxReader,
    mut demuxer: StreamDemuxer,
) -> Result<(), StreamError> {
    let mut frames = FramedRead::new(reader, MediaStreamCodec::new());

    while let Some(packet) = frames.next().await {
        demuxer.dispatch(&packet?);
    }

    debug!("Video stream ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::Encoder;

    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    struct Named {
        name: &'static str,
        log: Log,
    }

    impl StreamConsumer for Named {
        fn on_configuration(&mut self, data: &Bytes) {
            self.log
                .0
                .lock()
                .unwrap()
                .push(format!("{}:config:{}", self.name, data.len()));
        }

        fn on_data(&mut self, packet: &DataPacket) {
            self.log
                .0
                .lock()
                .unwrap()
                .push(format!("{}:data:{}", self.name, packet.pts));
        }
    }

    fn encode(packets: &[MediaPacket]) -> BytesMut {
        let mut codec = MediaStreamCodec::new();
        let mut buf = BytesMut::new();
        for packet in packets {
            codec.encode(packet.clone(), &mut buf).unwrap();
        }
        buf
    }

    #[tokio::test]
    async fn test_units_reach_consumers_in_order() {
        let log = Log::default();
        let demuxer = StreamDemuxer::new()
            .with_consumer(Named {
                name: "a",
                log: log.clone(),
            })
            .with_consumer(Named {
                name: "b",
                log: log.clone(),
            });
        assert_eq!(demuxer.consumer_count(), 2);

        let bytes = encode(&[
            MediaPacket::configuration(vec![1, 2, 3]),
            MediaPacket::data(10, true, vec![0; 4]),
            MediaPacket::data(20, false, vec![0; 4]),
        ]);

        let (mut tx, rx) = tokio::io::duplex(1024);
        tx.write_all(&bytes).await.unwrap();
        drop(tx);

        run_pipeline(Box::pin(rx), demuxer).await.unwrap();

        assert_eq!(
            *log.0.lock().unwrap(),
            vec![
                "a:config:3",
                "b:config:3",
                "a:data:10",
                "b:data:10",
                "a:data:20",
                "b:data:20",
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_kind_ends_pipeline() {
        let log = Log::default();
        let demuxer = StreamDemuxer::new().with_consumer(Named {
            name: "a",
            log: log.clone(),
        });

        let mut bytes = encode(&[MediaPacket::data(1, false, vec![9])]);
        bytes.extend_from_slice(&(0xc000_0000_0000_0000u64).to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&encode(&[MediaPacket::data(2, false, vec![9])]));

        let (mut tx, rx) = tokio::io::duplex(1024);
        tx.write_all(&bytes).await.unwrap();
        drop(tx);

        let result = run_pipeline(Box::pin(rx), demuxer).await;
        assert!(matches!(result, Err(StreamError::InvalidPacketKind(_))));
        assert_eq!(*log.0.lock().unwrap(), vec!["a:data:1"]);
    }
}
