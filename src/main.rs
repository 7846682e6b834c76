use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep, timeout, Duration};

use auv_nav_rs::config::{parse_server_list, NavigationConfig, NodeConfig};
use auv_nav_rs::fabric::{is_memory_url, Connector, JsonCodec, MemoryBroker, NatsConnector, Node};
use auv_nav_rs::nodes::{GpsNode, PositionNode};
use auv_nav_rs::types::{topics, PositionEstimate};

#[derive(Parser, Debug)]
#[command(name = "auv_nav")]
#[command(about = "AUV navigation core - NMEA decoding and EKF position estimation", long_about = None)]
struct Args {
    /// JSON configuration file (node names, servers, rates, EKF tuning)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// NMEA input: a file path, or "-" for stdin
    #[arg(long, value_name = "PATH")]
    nmea: Option<String>,

    /// Position estimate publish rate in Hz (overrides the config file)
    #[arg(long)]
    rate: Option<f64>,

    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Position node name (overrides the config file)
    #[arg(long)]
    name: Option<String>,

    /// Comma-separated NATS servers, or memory:// to run every node in this
    /// process (overrides config and environment)
    #[arg(long)]
    servers: Option<String>,

    /// Aggregate NMEA sentences whose checksum does not match
    #[arg(long)]
    accept_invalid: bool,
}

fn load_config(args: &Args) -> Result<NavigationConfig> {
    let mut config = match &args.config {
        Some(path) => NavigationConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NavigationConfig::default(),
    };

    config.gps = config.gps.apply_env();
    config.position = config.position.apply_env();

    if let Some(raw) = &args.servers {
        let servers = parse_server_list(raw);
        config.gps.servers = servers.clone();
        config.position.servers = servers;
    }
    if let Some(rate) = args.rate {
        config.position.rate_hz = Some(rate);
    }
    if let Some(name) = &args.name {
        config.position.name = name.clone();
    }
    Ok(config)
}

async fn open_nmea(source: &str) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
    if source == "-" {
        return Ok(Box::new(tokio::io::stdin()));
    }
    let file = tokio::fs::File::open(source)
        .await
        .with_context(|| format!("opening NMEA input {source}"))?;
    Ok(Box::new(file))
}

async fn deadline(duration: u64) {
    if duration > 0 {
        sleep(Duration::from_secs(duration)).await;
    } else {
        std::future::pending::<()>().await;
    }
}

/// Resolves on Ctrl-C, or once `duration` seconds have passed when non-zero.
async fn stop_signal(duration: u64) {
    tokio::select! {
        _ = deadline(duration) => info!("Duration reached"),
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Interrupted"),
            Err(e) => {
                warn!("Ctrl-C handler unavailable: {}", e);
                deadline(duration).await;
                info!("Duration reached");
            }
        },
    }
}

/// How long to wait for a first estimate once the NMEA input has ended
const INPUT_END_GRACE: Duration = Duration::from_secs(2);

fn connector_for<'a>(
    servers: &[String],
    broker: &'a MemoryBroker,
    nats: &'a NatsConnector,
) -> &'a dyn Connector {
    if is_memory_url(servers) {
        broker as &dyn Connector
    } else {
        nats as &dyn Connector
    }
}

fn loop_period(rate_hz: Option<f64>) -> Duration {
    match rate_hz {
        Some(rate) if rate.is_finite() && rate > 0.0 => Duration::from_secs_f64(1.0 / rate),
        _ => Duration::ZERO,
    }
}

/// Give the position node a chance to publish what the input produced:
/// wait for a first estimate, then one more loop period for it to go out.
async fn let_final_estimate_out(
    estimates: &mut watch::Receiver<Option<PositionEstimate>>,
    period: Duration,
) {
    let ready = timeout(INPUT_END_GRACE, estimates.wait_for(|e| e.is_some()))
        .await
        .map(|waited| waited.is_ok());
    match ready {
        Ok(true) => sleep(period * 2).await,
        Ok(false) => {}
        Err(_) => warn!("No position estimate produced from the NMEA input"),
    }
}

/// Resolves when the GPS task ends; never resolves without one.
async fn input_finished(
    task: &mut Option<JoinHandle<auv_nav_rs::Result<()>>>,
) -> std::result::Result<auv_nav_rs::Result<()>, JoinError> {
    match task.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args)?;

    info!("AUV navigation core starting");
    info!("  Position node: {} @ {:?} Hz", config.position.name, config.position.rate_hz);
    info!("  Servers: {}", config.position.servers.join(","));
    info!("  NMEA input: {}", args.nmea.as_deref().unwrap_or("(none)"));
    info!("  Duration: {} seconds (0=continuous)", args.duration);

    // memory:// nodes share this broker; every other node gets its own
    // NATS connection
    let broker = MemoryBroker::new();
    let nats = NatsConnector::new();

    let position_node = Arc::new(
        Node::create(
            config.position.clone(),
            connector_for(&config.position.servers, &broker, &nats),
        )
        .await
        .context("connecting position node")?,
    );
    let position = PositionNode::new(position_node.clone(), config.ekf.clone())
        .context("setting up position node")?;
    let mut latest_estimate = position.estimates();
    let position_task = tokio::spawn(position.run());

    let logger_node = Arc::new(
        Node::create(
            NodeConfig::new("estimate-logger").with_servers(config.position.servers.clone()),
            connector_for(&config.position.servers, &broker, &nats),
        )
        .await
        .context("connecting estimate logger")?,
    );
    let mut estimates = logger_node
        .create_subscriber(
            topics::POSITION_ESTIMATE,
            JsonCodec::<PositionEstimate>::new(),
            "estimate",
        )
        .context("subscribing to position estimates")?;
    let logger_task = tokio::spawn(async move {
        while let Some(delivery) = estimates.recv().await {
            match delivery {
                Ok(estimate) => {
                    let local = estimate.local;
                    match estimate.global {
                        Some(global) => info!(
                            "x={:.2} y={:.2} z={:.2} v={:.2} | lat={:.6} lon={:.6} alt={:.1}",
                            local.x, local.y, local.z, local.v,
                            global.latitude, global.longitude, global.altitude
                        ),
                        None => info!(
                            "x={:.2} y={:.2} z={:.2} v={:.2}",
                            local.x, local.y, local.z, local.v
                        ),
                    }
                }
                Err(e) => warn!("{}", e),
            }
        }
    });

    let gps_node = Arc::new(
        Node::create(
            config.gps.clone(),
            connector_for(&config.gps.servers, &broker, &nats),
        )
        .await
        .context("connecting GPS node")?,
    );
    let mut gps_task = match &args.nmea {
        Some(source) => {
            let reader = open_nmea(source).await?;
            let gps = GpsNode::new(gps_node.clone(), args.accept_invalid)
                .context("setting up GPS node")?;
            Some(tokio::spawn(gps.run(reader)))
        }
        None => None,
    };

    let stop = stop_signal(args.duration);
    tokio::pin!(stop);

    let gps_outcome = tokio::select! {
        _ = &mut stop => None,
        outcome = input_finished(&mut gps_task) => {
            info!("NMEA input finished");
            Some(outcome)
        }
    };
    if gps_outcome.is_some() {
        let period = loop_period(config.position.rate_hz);
        tokio::select! {
            _ = let_final_estimate_out(&mut latest_estimate, period) => {}
            _ = &mut stop => {}
        }
    }

    gps_node.close();
    position_node.close();
    logger_node.close();

    let gps_outcome = match (gps_outcome, gps_task) {
        (Some(outcome), _) => Some(outcome),
        (None, Some(task)) => Some(task.await),
        (None, None) => None,
    };
    if let Some(outcome) = gps_outcome {
        outcome.context("GPS task panicked")??;
    }
    position_task.await.context("position task panicked")??;
    logger_task.await.context("logger task panicked")?;
    broker.shutdown();

    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use auv_nav_rs::types::EkfState;
    use tokio::time::Instant;

    fn estimate() -> PositionEstimate {
        PositionEstimate {
            local: EkfState {
                x: 0.0,
                y: 0.0,
                z: 10.0,
                v: 0.0,
                qw: 1.0,
                qx: 0.0,
                qy: 0.0,
                qz: 0.0,
            },
            global: None,
            timestamp: 0.0,
        }
    }

    #[test]
    fn test_loop_period() {
        assert_eq!(loop_period(Some(10.0)), Duration::from_millis(100));
        assert_eq!(loop_period(None), Duration::ZERO);
        assert_eq!(loop_period(Some(0.0)), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_end_waits_for_first_estimate() {
        let (tx, mut rx) = watch::channel(None);
        tokio::spawn(async move {
            sleep(Duration::from_millis(150)).await;
            tx.send_replace(Some(estimate()));
            sleep(Duration::from_secs(60)).await;
        });

        let started = Instant::now();
        let_final_estimate_out(&mut rx, Duration::from_millis(100)).await;
        assert_eq!(started.elapsed().as_millis(), 350);
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_end_gives_up_without_estimate() {
        let (_tx, mut rx) = watch::channel::<Option<PositionEstimate>>(None);
        let started = Instant::now();
        let_final_estimate_out(&mut rx, Duration::from_millis(100)).await;
        assert_eq!(started.elapsed(), INPUT_END_GRACE);
    }

    #[tokio::test]
    async fn test_memory_servers_use_broker() {
        let broker = MemoryBroker::new();
        let nats = NatsConnector::new();
        let servers = vec!["memory://".to_string()];
        let node = Node::create(
            NodeConfig::new("logger").with_servers(servers.clone()),
            connector_for(&servers, &broker, &nats),
        )
        .await
        .unwrap();
        let _sub = node
            .create_subscriber(
                topics::POSITION_ESTIMATE,
                JsonCodec::<PositionEstimate>::new(),
                "estimate",
            )
            .unwrap();
        assert_eq!(broker.subscriber_count(topics::POSITION_ESTIMATE), 1);
    }
}
