//! Process configuration.
//!
//! The core only needs a node name, the transport endpoints and (for nodes
//! that publish periodically) a loop rate. Everything else is filter tuning.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{NavError, Result};
use crate::filters::position_ekf::EkfConfig;

/// Environment variable overriding the transport server list (comma separated).
pub const SERVERS_ENV: &str = "AUV_TRANSPORT_SERVERS";

pub const DEFAULT_SERVER: &str = "nats://localhost:4222";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name, also the prefix of every queue group this node joins
    pub name: String,

    /// Transport endpoints: NATS URLs, or `memory://` for the in-process broker
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,

    /// Fixed-rate loop frequency [Hz]
    #[serde(default)]
    pub rate_hz: Option<f64>,
}

fn default_servers() -> Vec<String> {
    vec![DEFAULT_SERVER.to_string()]
}

impl NodeConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            servers: default_servers(),
            rate_hz: None,
        }
    }

    pub fn with_rate(mut self, rate_hz: f64) -> Self {
        self.rate_hz = Some(rate_hz);
        self
    }

    pub fn with_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers = servers.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the server list with `AUV_TRANSPORT_SERVERS` when it is set.
    pub fn apply_env(mut self) -> Self {
        if let Ok(raw) = std::env::var(SERVERS_ENV) {
            let servers = parse_server_list(&raw);
            if !servers.is_empty() {
                self.servers = servers;
            }
        }
        self
    }
}

pub fn parse_server_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Configuration for the whole navigation process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NavigationConfig {
    #[serde(default = "default_gps_node")]
    pub gps: NodeConfig,

    #[serde(default = "default_position_node")]
    pub position: NodeConfig,

    #[serde(default)]
    pub ekf: EkfConfig,
}

fn default_gps_node() -> NodeConfig {
    NodeConfig::new("gps")
}

fn default_position_node() -> NodeConfig {
    NodeConfig::new("ekf-position-estimator").with_rate(10.0)
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            gps: default_gps_node(),
            position: default_position_node(),
            ekf: EkfConfig::default(),
        }
    }
}

impl NavigationConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| NavError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| NavError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }
}
