// src/config.rs

//! Loads the HA manager's own configuration from a TOML file, following the
//! same `serde` + `toml` + `#[serde(default = "fn")]` idiom the rest of this
//! codebase uses for its config structs.

use crate::core::errors::HaError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

fn default_node_address() -> String {
    "127.0.0.1".to_string()
}

fn default_node_port() -> u16 {
    10051
}

fn default_ipc_socket_path() -> PathBuf {
    PathBuf::from("/tmp/ignis-ha.sock")
}

fn default_tick_period() -> Duration {
    Duration::from_secs(5)
}

/// Configuration for one HA manager instance, read once at process start and
/// handed to [`crate::core::manager::run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaManagerConfig {
    /// `HA_NODE_NAME`: empty ⇒ standalone, otherwise the cluster member name.
    #[serde(default)]
    pub node_name: String,

    /// `NODE_ADDRESS`: the externally reachable host published in the
    /// registry (default port 10051).
    #[serde(default = "default_node_address")]
    pub node_address: String,

    #[serde(default = "default_node_port")]
    pub node_port: u16,

    /// The Unix-domain socket the manager listens on for the Parent
    /// Notification Channel.
    #[serde(default = "default_ipc_socket_path")]
    pub ipc_socket_path: PathBuf,

    /// Postgres connection string for the shared registry. `None` runs
    /// against the in-memory store instead, for local experimentation.
    #[serde(default)]
    pub database_url: Option<String>,

    /// The `configid` row this instance's global settings live under.
    #[serde(default = "default_configid")]
    pub configid: i64,

    #[serde(with = "humantime_serde", default = "default_tick_period")]
    pub tick_period: Duration,
}

fn default_configid() -> i64 {
    1
}

impl Default for HaManagerConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            node_address: default_node_address(),
            node_port: default_node_port(),
            ipc_socket_path: default_ipc_socket_path(),
            database_url: None,
            configid: default_configid(),
            tick_period: default_tick_period(),
        }
    }
}

impl HaManagerConfig {
    pub async fn from_file(path: &str) -> Result<Self, HaError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| HaError::Config(format!("failed to read config file '{path}': {e}")))?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}
