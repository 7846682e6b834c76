//! GPS receiver node: raw NMEA bytes in, [`GpsData`] snapshots out.

use log::{debug, info};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{NavError, Result};
use crate::fabric::node::closed;
use crate::fabric::{JsonCodec, Node, TopicPublisher};
use crate::nmea::{GpsFixAggregator, NmeaDecoder};
use crate::types::{topics, GpsData};

const READ_CHUNK: usize = 512;

pub struct GpsNode {
    node: Arc<Node>,
    decoder: NmeaDecoder,
    aggregator: GpsFixAggregator,
    publisher: TopicPublisher<GpsData>,
    published: u64,
}

impl GpsNode {
    pub fn new(node: Arc<Node>, accept_invalid: bool) -> Result<Self> {
        let publisher = node.create_publisher(topics::GPS, JsonCodec::<GpsData>::new())?;
        Ok(Self {
            node,
            decoder: NmeaDecoder::new(),
            aggregator: GpsFixAggregator::new().accept_invalid(accept_invalid),
            publisher,
            published: 0,
        })
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn parse_errors(&self) -> u64 {
        self.aggregator.parse_errors()
    }

    /// Decode `bytes` and publish one snapshot per aggregated sentence.
    /// Returns how many snapshots went out.
    pub fn ingest(&mut self, bytes: &[u8]) -> Result<usize> {
        self.decoder.feed_to(bytes, &mut self.aggregator);
        let updates = self.aggregator.take_updates();
        for update in &updates {
            self.publisher.send(update)?;
        }
        self.published += updates.len() as u64;
        Ok(updates.len())
    }

    /// Pump `reader` until it ends or the node is closed.
    pub async fn run<R>(mut self, mut reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        info!("GPS node '{}' reading NMEA input", self.node.name());
        let mut state = self.node.watch_state();
        let mut buf = [0u8; READ_CHUNK];

        loop {
            let read = tokio::select! {
                biased;
                _ = closed(&mut state) => break,
                read = reader.read(&mut buf) => read,
            };
            let n = read.map_err(|e| NavError::Io(format!("NMEA input: {e}")))?;
            if n == 0 {
                debug!("NMEA input ended");
                break;
            }
            self.ingest(&buf[..n])?;
        }

        info!(
            "GPS node '{}' done: {} fixes published, {} sentences rejected",
            self.node.name(),
            self.published,
            self.aggregator.parse_errors()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::fabric::MemoryBroker;
    use crate::types::LinkQuality;

    const INPUT: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n\
                         $GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,X,46.9,M,,*47\r\n\
                         $GPHDT,274.07,T*03\r\n";

    #[tokio::test]
    async fn test_run_publishes_aggregated_fixes() {
        let broker = MemoryBroker::new();
        let gps = Arc::new(Node::create(NodeConfig::new("gps"), &broker).await.unwrap());
        let listener = Node::create(NodeConfig::new("logger"), &broker).await.unwrap();
        let mut sub = listener
            .create_subscriber(topics::GPS, JsonCodec::<GpsData>::new(), "gps")
            .unwrap();

        let node = GpsNode::new(gps.clone(), false).unwrap();
        node.run(INPUT.as_bytes()).await.unwrap();

        let fix = sub.recv().await.unwrap().unwrap();
        assert_eq!(fix.link_quality, LinkQuality::Poor);
        assert_eq!(fix.satellites, Some(8));
        assert_eq!(sub.last_origin(), Some("gps"));
    }

    #[tokio::test]
    async fn test_ingest_counts() {
        let broker = MemoryBroker::new();
        let gps = Arc::new(Node::create(NodeConfig::new("gps"), &broker).await.unwrap());
        let mut node = GpsNode::new(gps, false).unwrap();

        let (head, tail) = INPUT.as_bytes().split_at(30);
        assert_eq!(node.ingest(head).unwrap(), 0);
        assert_eq!(node.ingest(tail).unwrap(), 1);
        assert_eq!(node.published(), 1);
        assert_eq!(node.parse_errors(), 1);
    }

    #[tokio::test]
    async fn test_closed_node_stops_reading() {
        let broker = MemoryBroker::new();
        let gps = Arc::new(Node::create(NodeConfig::new("gps"), &broker).await.unwrap());
        let node = GpsNode::new(gps.clone(), false).unwrap();

        // A reader that never yields data
        let (_writer, reader) = tokio::io::duplex(64);
        let task = tokio::spawn(node.run(reader));
        tokio::task::yield_now().await;
        gps.close();
        task.await.unwrap().unwrap();
    }
}
