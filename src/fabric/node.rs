//! A named participant on the fabric.

use log::{debug, info, warn};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use super::codec::Codec;
use super::topic::{TopicPublisher, TopicSubscriber};
use super::transport::{Connector, SubscriptionId, Transport};
use crate::config::NodeConfig;
use crate::error::{NavError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal
    Closed,
}

/// Resolves once `state` reports [`ConnectionState::Closed`].
///
/// If the owning node is dropped without closing, this never resolves and
/// the caller is left to the transport.
pub(crate) async fn closed(state: &mut watch::Receiver<ConnectionState>) {
    let outcome = state
        .wait_for(|s| *s == ConnectionState::Closed)
        .await
        .map(|_| ());
    if outcome.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Time left in a loop period once `elapsed` has been spent on work.
pub fn remaining_period(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

/// Live subscription ids of one node, shared with its subscribers so a
/// dropped subscriber can remove itself.
pub(crate) type SubscriptionRegistry = Arc<Mutex<Vec<SubscriptionId>>>;

pub(crate) fn lock_registry(
    registry: &SubscriptionRegistry,
) -> MutexGuard<'_, Vec<SubscriptionId>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Node {
    config: NodeConfig,
    transport: Option<Arc<dyn Transport>>,
    state: watch::Sender<ConnectionState>,
    subscriptions: SubscriptionRegistry,
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            transport: None,
            state,
            subscriptions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Build a node and connect it in one step.
    pub async fn create<C: Connector + ?Sized>(config: NodeConfig, connector: &C) -> Result<Self> {
        let mut node = Self::new(config);
        node.connect(connector).await?;
        Ok(node)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Subscribers created by this node that are still alive.
    pub fn subscription_count(&self) -> usize {
        lock_registry(&self.subscriptions).len()
    }

    pub async fn connect<C: Connector + ?Sized>(&mut self, connector: &C) -> Result<()> {
        match self.state() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Closed => {
                return Err(NavError::Connection(format!(
                    "node '{}' is closed",
                    self.config.name
                )))
            }
            _ => {}
        }

        self.state.send_replace(ConnectionState::Connecting);
        match connector.connect(&self.config).await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.state.send_replace(ConnectionState::Connected);
                info!(
                    "Node '{}' connected ({})",
                    self.config.name,
                    self.config.servers.join(",")
                );
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                warn!("Node '{}' failed to connect: {}", self.config.name, e);
                Err(e)
            }
        }
    }

    fn live_transport(&self) -> Result<&Arc<dyn Transport>> {
        match (&self.transport, self.state()) {
            (Some(transport), ConnectionState::Connected) => Ok(transport),
            (_, state) => Err(NavError::Transport(format!(
                "node '{}' is not connected ({:?})",
                self.config.name, state
            ))),
        }
    }

    pub fn create_publisher<T, C>(&self, topic: &str, codec: C) -> Result<TopicPublisher<T>>
    where
        C: Codec<T> + 'static,
    {
        let transport = self.live_transport()?.clone();
        debug!("Node '{}' publishing on '{}'", self.config.name, topic);
        Ok(TopicPublisher::new(
            topic,
            &self.config.name,
            Box::new(codec),
            transport,
        ))
    }

    /// Join queue group `<node name>-<subscription>` on `topic`.
    pub fn create_subscriber<T, C>(
        &self,
        topic: &str,
        codec: C,
        subscription: &str,
    ) -> Result<TopicSubscriber<T>>
    where
        C: Codec<T> + 'static,
    {
        let transport = self.live_transport()?.clone();
        let queue_group = format!("{}-{}", self.config.name, subscription);
        let handle = transport.subscribe(topic, &queue_group)?;
        lock_registry(&self.subscriptions).push(handle.id);
        Ok(TopicSubscriber::new(
            topic,
            queue_group,
            Box::new(codec),
            handle,
            transport,
            self.state.subscribe(),
            self.subscriptions.clone(),
        ))
    }

    fn loop_period(&self) -> Result<Duration> {
        match self.config.rate_hz {
            Some(rate) if rate.is_finite() && rate > 0.0 => Ok(Duration::from_secs_f64(1.0 / rate)),
            Some(rate) => Err(NavError::InvalidRate(format!(
                "node '{}' rate {} Hz",
                self.config.name, rate
            ))),
            None => Err(NavError::InvalidRate(format!(
                "node '{}' has no rate configured",
                self.config.name
            ))),
        }
    }

    /// Run `work` once per period until the node is closed.
    ///
    /// Overruns are not made up: a slow iteration just starts the next one
    /// immediately. The first error from `work` ends the loop.
    pub async fn run_at_fixed_rate<F, Fut>(&self, mut work: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let period = self.loop_period()?;
        let mut state = self.state.subscribe();

        loop {
            let is_closed = *state.borrow() == ConnectionState::Closed;
            if is_closed {
                return Ok(());
            }

            let started = Instant::now();
            work().await?;
            let pause = remaining_period(period, started.elapsed());

            tokio::select! {
                biased;
                _ = closed(&mut state) => return Ok(()),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Release the connection and every subscription. Safe to call on a
    /// node that never connected or is already closed.
    pub fn close(&self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.state.send_replace(ConnectionState::Closed);

        let ids: Vec<_> = lock_registry(&self.subscriptions).drain(..).collect();
        if let Some(transport) = &self.transport {
            for id in ids {
                transport.unsubscribe(id);
            }
            transport.close();
        }
        info!("Node '{}' closed", self.config.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::codec::JsonCodec;
    use crate::fabric::memory::MemoryBroker;
    use crate::types::DepthReading;

    async fn connected(broker: &MemoryBroker, name: &str, rate: Option<f64>) -> Node {
        let mut config = NodeConfig::new(name);
        config.rate_hz = rate;
        Node::create(config, broker).await.unwrap()
    }

    #[test]
    fn test_remaining_period() {
        let period = Duration::from_millis(100);
        assert_eq!(
            remaining_period(period, Duration::from_millis(30)),
            Duration::from_millis(70)
        );
        assert_eq!(
            remaining_period(period, Duration::from_millis(150)),
            Duration::ZERO
        );
    }

    #[tokio::test]
    async fn test_invalid_rate_fails_fast() {
        let broker = MemoryBroker::new();
        for rate in [None, Some(0.0), Some(-5.0), Some(f64::NAN), Some(f64::INFINITY)] {
            let node = connected(&broker, "loop", rate).await;
            let mut calls = 0;
            let result = node
                .run_at_fixed_rate(|| {
                    calls += 1;
                    async { Ok(()) }
                })
                .await;
            assert!(matches!(result, Err(NavError::InvalidRate(_))), "rate {rate:?}");
            assert_eq!(calls, 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_rate_spacing() {
        let broker = MemoryBroker::new();
        let node = connected(&broker, "loop", Some(10.0)).await;
        let origin = Instant::now();
        let calls = Mutex::new(Vec::new());

        let run = node.run_at_fixed_rate(|| {
            calls.lock().unwrap().push(origin.elapsed());
            async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(())
            }
        });
        let stop = async {
            tokio::time::sleep(Duration::from_millis(350)).await;
            node.close();
        };
        let (result, _) = tokio::join!(run, stop);

        assert!(result.is_ok());
        let calls = calls.into_inner().unwrap();
        let millis: Vec<u128> = calls.iter().map(|d| d.as_millis()).collect();
        assert_eq!(millis, vec![0, 100, 200, 300]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrun_does_not_catch_up() {
        let broker = MemoryBroker::new();
        let node = connected(&broker, "loop", Some(10.0)).await;
        let origin = Instant::now();
        let calls = Mutex::new(Vec::new());

        let run = node.run_at_fixed_rate(|| {
            calls.lock().unwrap().push(origin.elapsed());
            async {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok(())
            }
        });
        let stop = async {
            tokio::time::sleep(Duration::from_millis(400)).await;
            node.close();
        };
        let (result, _) = tokio::join!(run, stop);

        assert!(result.is_ok());
        let millis: Vec<u128> = calls
            .into_inner()
            .unwrap()
            .iter()
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(millis, vec![0, 150, 300]);
    }

    #[tokio::test]
    async fn test_work_error_stops_loop() {
        let broker = MemoryBroker::new();
        let node = connected(&broker, "loop", Some(1000.0)).await;
        let mut calls = 0;
        let result = node
            .run_at_fixed_rate(|| {
                calls += 1;
                let fail = calls == 3;
                async move {
                    if fail {
                        Err(NavError::Transport("link down".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert_eq!(result, Err(NavError::Transport("link down".into())));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_node_disconnected() {
        let broker = MemoryBroker::new();
        let config = NodeConfig::new("gps").with_servers(Vec::<String>::new());
        let mut node = Node::new(config);
        let err = node.connect(&broker).await.unwrap_err();
        assert!(matches!(err, NavError::Connection(_)));
        assert_eq!(node.state(), ConnectionState::Disconnected);
        assert!(matches!(
            node.create_publisher::<DepthReading, _>("t", JsonCodec::new()),
            Err(NavError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_state_machine() {
        let broker = MemoryBroker::new();
        let mut node = Node::new(NodeConfig::new("depth"));
        assert_eq!(node.state(), ConnectionState::Disconnected);
        node.connect(&broker).await.unwrap();
        assert_eq!(node.state(), ConnectionState::Connected);
        node.close();
        assert_eq!(node.state(), ConnectionState::Closed);
        assert!(matches!(
            node.connect(&broker).await,
            Err(NavError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_leaves_registry() {
        let broker = MemoryBroker::new();
        let node = connected(&broker, "ekf", None).await;
        let depth = node
            .create_subscriber::<DepthReading, _>("auv.sensors.depth", JsonCodec::new(), "depth")
            .unwrap();
        let _imu = node
            .create_subscriber::<DepthReading, _>("auv.sensors.imu", JsonCodec::new(), "imu")
            .unwrap();
        assert_eq!(node.subscription_count(), 2);

        for _ in 0..3 {
            let churn = node
                .create_subscriber::<DepthReading, _>("auv.sensors.depth", JsonCodec::new(), "churn")
                .unwrap();
            drop(churn);
        }
        assert_eq!(node.subscription_count(), 2);

        drop(depth);
        assert_eq!(node.subscription_count(), 1);
        node.close();
        assert_eq!(node.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_safe_unconnected() {
        let unconnected = Node::new(NodeConfig::new("idle"));
        unconnected.close();
        unconnected.close();
        assert_eq!(unconnected.state(), ConnectionState::Closed);

        let broker = MemoryBroker::new();
        let node = connected(&broker, "depth", None).await;
        let _sub = node
            .create_subscriber::<DepthReading, _>("auv.sensors.depth", JsonCodec::new(), "depth")
            .unwrap();
        assert_eq!(broker.subscriber_count("auv.sensors.depth"), 1);
        node.close();
        node.close();
        assert_eq!(broker.subscriber_count("auv.sensors.depth"), 0);
        assert!(matches!(
            node.create_subscriber::<DepthReading, _>("auv.sensors.depth", JsonCodec::new(), "depth"),
            Err(NavError::Transport(_))
        ));
    }
}
