//! Position estimator node.
//!
//! Four subscriptions (IMU, GPS, depth, speed) feed one channel. A single
//! task owns the filter, applies events in arrival order and writes a fresh
//! [`PositionEstimate`] snapshot after each one. The fixed-rate loop only
//! reads snapshots and publishes them.

use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::fabric::{JsonCodec, Node, TopicPublisher, TopicSubscriber};
use crate::filters::position_ekf::{EkfConfig, PositionEkf};
use crate::types::{topics, DepthReading, GpsData, ImuData, PositionEstimate, SpeedEstimate};

const EVENT_CAPACITY: usize = 512;

#[derive(Clone, Debug, PartialEq)]
pub enum SensorEvent {
    Imu(ImuData),
    Gps(GpsData),
    /// Depth [m, positive down]
    Depth(f64),
    /// Forward speed [m/s]
    Speed(f64),
}

impl SensorEvent {
    fn label(&self) -> &'static str {
        match self {
            SensorEvent::Imu(_) => "imu",
            SensorEvent::Gps(_) => "gps",
            SensorEvent::Depth(_) => "depth",
            SensorEvent::Speed(_) => "speed",
        }
    }
}

/// Filter lifecycle: nothing until the first qualifying fix, then every
/// event goes to the EKF.
pub struct PositionEstimator {
    config: EkfConfig,
    ekf: Option<PositionEkf>,
}

impl PositionEstimator {
    pub fn new(config: EkfConfig) -> Self {
        Self { config, ekf: None }
    }

    pub fn is_initialized(&self) -> bool {
        self.ekf.is_some()
    }

    pub fn ekf(&self) -> Option<&PositionEkf> {
        self.ekf.as_ref()
    }

    pub fn handle(&mut self, event: &SensorEvent) -> Result<()> {
        if self.ekf.is_none() {
            return self.try_initialize(event);
        }
        let Some(ekf) = self.ekf.as_mut() else {
            return Ok(());
        };
        match event {
            SensorEvent::Imu(imu) => {
                if !ekf.predict(imu) {
                    debug!("IMU sample without orientation or linear acceleration");
                }
                Ok(())
            }
            SensorEvent::Gps(fix) => ekf.update_gps(fix),
            SensorEvent::Depth(depth) => ekf.update_depth(*depth),
            SensorEvent::Speed(speed) => ekf.update_velocity(*speed),
        }
    }

    fn try_initialize(&mut self, event: &SensorEvent) -> Result<()> {
        match event {
            SensorEvent::Gps(fix) if PositionEkf::fix_sufficient(fix) => {
                self.ekf = Some(PositionEkf::new(fix, self.config.clone())?);
                Ok(())
            }
            SensorEvent::Gps(fix) => {
                debug!(
                    "Waiting for a qualifying fix (link {}, fix {:?})",
                    fix.link_quality, fix.fix
                );
                Ok(())
            }
            other => {
                debug!("Dropping {} event before initialization", other.label());
                Ok(())
            }
        }
    }

    pub fn estimate(&self, timestamp: f64) -> Option<PositionEstimate> {
        self.ekf.as_ref().map(|ekf| ekf.estimate(timestamp))
    }
}

fn now_seconds() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

fn spawn_forwarder<T, F>(
    mut subscriber: TopicSubscriber<T>,
    events: mpsc::Sender<SensorEvent>,
    wrap: F,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: Fn(T) -> SensorEvent + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(delivery) = subscriber.recv().await {
            match delivery {
                Ok(message) => {
                    if events.send(wrap(message)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("{}", e),
            }
        }
        debug!("Subscription to '{}' ended", subscriber.topic());
    })
}

pub struct PositionNode {
    node: Arc<Node>,
    estimator: PositionEstimator,
    imu: TopicSubscriber<ImuData>,
    gps: TopicSubscriber<GpsData>,
    depth: TopicSubscriber<DepthReading>,
    speed: TopicSubscriber<SpeedEstimate>,
    publisher: TopicPublisher<PositionEstimate>,
    snapshots: watch::Sender<Option<PositionEstimate>>,
}

impl PositionNode {
    /// Subscribe and prepare the publisher; nothing runs until [`run`](Self::run).
    pub fn new(node: Arc<Node>, config: EkfConfig) -> Result<Self> {
        let imu = node.create_subscriber(topics::IMU, JsonCodec::<ImuData>::new(), "imu")?;
        let gps = node.create_subscriber(topics::GPS, JsonCodec::<GpsData>::new(), "gps")?;
        let depth =
            node.create_subscriber(topics::DEPTH, JsonCodec::<DepthReading>::new(), "depth")?;
        let speed = node.create_subscriber(
            topics::SPEED_ESTIMATE,
            JsonCodec::<SpeedEstimate>::new(),
            "speed",
        )?;
        let publisher = node.create_publisher(
            topics::POSITION_ESTIMATE,
            JsonCodec::<PositionEstimate>::new(),
        )?;
        let (snapshots, _) = watch::channel(None);

        Ok(Self {
            node,
            estimator: PositionEstimator::new(config),
            imu,
            gps,
            depth,
            speed,
            publisher,
            snapshots,
        })
    }

    /// Latest estimate, `None` until the filter is initialized.
    pub fn estimates(&self) -> watch::Receiver<Option<PositionEstimate>> {
        self.snapshots.subscribe()
    }

    /// Run until the node is closed or a fatal error occurs. The node is
    /// closed on the way out either way.
    pub async fn run(self) -> Result<()> {
        let PositionNode {
            node,
            mut estimator,
            imu,
            gps,
            depth,
            speed,
            publisher,
            snapshots,
        } = self;

        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CAPACITY);
        let forwarders = vec![
            spawn_forwarder(imu, events_tx.clone(), SensorEvent::Imu),
            spawn_forwarder(gps, events_tx.clone(), SensorEvent::Gps),
            spawn_forwarder(depth, events_tx.clone(), |d: DepthReading| {
                SensorEvent::Depth(d.depth)
            }),
            spawn_forwarder(speed, events_tx, |s: SpeedEstimate| {
                SensorEvent::Speed(s.speed)
            }),
        ];

        let latest = snapshots.subscribe();
        let estimator_node = node.clone();
        let estimator_task = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let was_initialized = estimator.is_initialized();
                match estimator.handle(&event) {
                    Ok(()) => {}
                    Err(e) if e.is_recoverable() => {
                        warn!("Skipped {} update: {}", event.label(), e);
                    }
                    Err(e) => {
                        error!("Position estimator stopped: {}", e);
                        estimator_node.close();
                        return Err(e);
                    }
                }
                if !was_initialized && estimator.is_initialized() {
                    info!("Position estimate available");
                }
                if let Some(estimate) = estimator.estimate(now_seconds()) {
                    snapshots.send_replace(Some(estimate));
                }
            }
            Ok(())
        });

        info!("Position node '{}' running", node.name());
        let loop_result = node
            .run_at_fixed_rate(|| {
                let snapshot = latest.borrow().clone();
                let outcome = match snapshot {
                    Some(mut estimate) => {
                        estimate.timestamp = now_seconds();
                        publisher.send(&estimate)
                    }
                    None => Ok(()),
                };
                std::future::ready(outcome)
            })
            .await;

        node.close();
        for forwarder in &forwarders {
            forwarder.abort();
        }
        let estimator_result = match estimator_task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Ok(()),
        };

        loop_result.and(estimator_result)
    }
}
