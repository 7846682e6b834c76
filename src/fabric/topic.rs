use log::trace;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::codec::Codec;
use super::node::{closed, lock_registry, ConnectionState, SubscriptionRegistry};
use super::transport::{Envelope, Subscription, SubscriptionId, Transport};
use crate::error::{NavError, Result};

pub struct TopicPublisher<T> {
    topic: String,
    origin: String,
    codec: Box<dyn Codec<T>>,
    transport: Arc<dyn Transport>,
}

impl<T> TopicPublisher<T> {
    pub(crate) fn new(
        topic: &str,
        origin: &str,
        codec: Box<dyn Codec<T>>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            topic: topic.to_string(),
            origin: origin.to_string(),
            codec,
            transport,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Encode and hand off to the transport. No delivery confirmation.
    pub fn send(&self, message: &T) -> Result<()> {
        let payload = self.codec.encode(message).map_err(|e| NavError::Encode {
            topic: self.topic.clone(),
            reason: e.to_string(),
        })?;
        self.transport.publish(Envelope {
            subject: self.topic.clone(),
            origin: self.origin.clone(),
            payload,
        })
    }
}

pub struct TopicSubscriber<T> {
    topic: String,
    queue_group: String,
    codec: Box<dyn Codec<T>>,
    id: SubscriptionId,
    receiver: mpsc::Receiver<Envelope>,
    transport: Arc<dyn Transport>,
    state: watch::Receiver<ConnectionState>,
    registry: SubscriptionRegistry,
    last_origin: Option<String>,
}

impl<T> TopicSubscriber<T> {
    pub(crate) fn new(
        topic: &str,
        queue_group: String,
        codec: Box<dyn Codec<T>>,
        subscription: Subscription,
        transport: Arc<dyn Transport>,
        state: watch::Receiver<ConnectionState>,
        registry: SubscriptionRegistry,
    ) -> Self {
        Self {
            topic: topic.to_string(),
            queue_group,
            codec,
            id: subscription.id,
            receiver: subscription.receiver,
            transport,
            state,
            registry,
            last_origin: None,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn queue_group(&self) -> &str {
        &self.queue_group
    }

    /// Name of the node that published the most recent delivery.
    pub fn last_origin(&self) -> Option<&str> {
        self.last_origin.as_deref()
    }

    /// Next delivery.
    ///
    /// `Some(Err(NavError::Decode { .. }))` for a payload the codec rejects;
    /// the subscription stays usable. `None` once the node is closed or the
    /// transport ends the subscription.
    pub async fn recv(&mut self) -> Option<Result<T>> {
        let is_closed = *self.state.borrow() == ConnectionState::Closed;
        if is_closed {
            return None;
        }

        let envelope = tokio::select! {
            biased;
            _ = closed(&mut self.state) => return None,
            envelope = self.receiver.recv() => envelope?,
        };

        trace!(
            "{} <- {} ({} bytes)",
            self.topic,
            envelope.origin,
            envelope.payload.len()
        );
        let decoded = self.codec.decode(&envelope.payload).map_err(|e| NavError::Decode {
            topic: self.topic.clone(),
            reason: e.to_string(),
        });
        self.last_origin = Some(envelope.origin);
        Some(decoded)
    }
}

impl<T> Drop for TopicSubscriber<T> {
    fn drop(&mut self) {
        lock_registry(&self.registry).retain(|id| *id != self.id);
        self.transport.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::fabric::codec::JsonCodec;
    use crate::fabric::memory::MemoryBroker;
    use crate::fabric::node::Node;
    use crate::types::{topics, DepthReading, SpeedEstimate};
    use std::time::Duration;

    async fn node(broker: &MemoryBroker, name: &str) -> Node {
        Node::create(NodeConfig::new(name), broker).await.unwrap()
    }

    #[tokio::test]
    async fn test_publish_subscribe_typed() {
        let broker = MemoryBroker::new();
        let depth_node = node(&broker, "depth").await;
        let ekf_node = node(&broker, "ekf").await;

        let mut sub = ekf_node
            .create_subscriber::<DepthReading, _>(topics::DEPTH, JsonCodec::new(), "depth")
            .unwrap();
        assert_eq!(sub.queue_group(), "ekf-depth");
        let publisher = depth_node
            .create_publisher::<DepthReading, _>(topics::DEPTH, JsonCodec::new())
            .unwrap();

        publisher.send(&DepthReading { depth: 4.5 }).unwrap();
        let reading = sub.recv().await.unwrap().unwrap();
        assert_eq!(reading.depth, 4.5);
        assert_eq!(sub.last_origin(), Some("depth"));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_isolated() {
        let broker = MemoryBroker::new();
        let ekf_node = node(&broker, "ekf").await;
        let mut sub = ekf_node
            .create_subscriber::<SpeedEstimate, _>(topics::SPEED_ESTIMATE, JsonCodec::new(), "speed")
            .unwrap();

        let raw = broker.open().unwrap();
        raw.publish(Envelope {
            subject: topics::SPEED_ESTIMATE.to_string(),
            origin: "noise".to_string(),
            payload: b"{not json".to_vec(),
        })
        .unwrap();

        let speed_node = node(&broker, "speed").await;
        let publisher = speed_node
            .create_publisher::<SpeedEstimate, _>(topics::SPEED_ESTIMATE, JsonCodec::new())
            .unwrap();
        for i in 0..5 {
            publisher.send(&SpeedEstimate { speed: i as f64 }).unwrap();
        }

        let first = sub.recv().await.unwrap();
        assert!(matches!(first, Err(NavError::Decode { ref topic, .. }) if topic == topics::SPEED_ESTIMATE));
        for i in 0..5 {
            let msg = sub.recv().await.unwrap().unwrap();
            assert_eq!(msg.speed, i as f64);
        }
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_recv() {
        let broker = MemoryBroker::new();
        let ekf_node = Arc::new(node(&broker, "ekf").await);
        let mut sub = ekf_node
            .create_subscriber::<DepthReading, _>(topics::DEPTH, JsonCodec::new(), "depth")
            .unwrap();

        let waiter = tokio::spawn(async move { sub.recv().await.is_none() });
        tokio::time::sleep(Duration::from_millis(10)).await;
        ekf_node.close();

        let ended = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("recv did not return after close")
            .unwrap();
        assert!(ended);
    }

    #[tokio::test]
    async fn test_send_after_close_is_transport_error() {
        let broker = MemoryBroker::new();
        let depth_node = node(&broker, "depth").await;
        let publisher = depth_node
            .create_publisher::<DepthReading, _>(topics::DEPTH, JsonCodec::new())
            .unwrap();
        depth_node.close();
        assert!(matches!(
            publisher.send(&DepthReading { depth: 1.0 }),
            Err(NavError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_dropping_subscriber_leaves_group() {
        let broker = MemoryBroker::new();
        let ekf_node = node(&broker, "ekf").await;
        let sub = ekf_node
            .create_subscriber::<DepthReading, _>(topics::DEPTH, JsonCodec::new(), "depth")
            .unwrap();
        assert_eq!(broker.subscriber_count(topics::DEPTH), 1);
        drop(sub);
        assert_eq!(broker.subscriber_count(topics::DEPTH), 0);
    }
}
