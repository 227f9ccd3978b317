//! Types for parsing coordinator configuration files.
//!
//! The top level config type is [`Config`].

use crate::server::ServerType;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

/// The top level config type.
///
/// This type can be read and written to config files using the [`serde::Serialize`] and
/// [`serde::Deserialize`] implementations.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Controls the coordinator cycle.
    pub coordinator: CoordinatorConfig,
    /// Controls the per-server load queues.
    pub load_queue: LoadQueueConfig,
    /// The historical servers of the cluster.
    pub servers: Vec<ServerConfig>,
}

impl Config {
    /// Looks up the server with the given name.
    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Checks settings that parse but cannot work.
    pub fn validate(&self) -> eyre::Result<()> {
        self.load_queue.validate()
    }
}

/// Specifies how often and on which inputs the coordinator runs.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CoordinatorConfig {
    /// The time between two coordinator cycles, in seconds.
    pub period_secs: u64,
    /// The file from which the set of used segments is read.
    ///
    /// Stands in for the metadata store. The file is re-read at the start of every cycle.
    pub used_segments_file: PathBuf,
    /// How long to wait for a server's inventory before leaving it out of a cycle, in seconds.
    pub inventory_timeout_secs: u64,
}

impl CoordinatorConfig {
    /// The time between two coordinator cycles.
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    /// The inventory request timeout.
    pub fn inventory_timeout(&self) -> Duration {
        Duration::from_secs(self.inventory_timeout_secs)
    }
}

/// Settings shared by all load queue peons.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoadQueueConfig {
    /// The maximum number of commands that may be outstanding on a single server.
    pub max_outstanding: usize,
    /// How long a server has to acknowledge a command, in milliseconds.
    pub command_timeout_millis: u64,
    /// The interval at which peons check their queue even if they were not woken up, in
    /// milliseconds.
    pub drain_period_millis: u64,
}

impl LoadQueueConfig {
    /// Fails if no command could ever be sent.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.max_outstanding == 0 {
            eyre::bail!("load-queue.max-outstanding must be at least 1");
        }
        Ok(())
    }

    /// The command acknowledgement timeout.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_millis)
    }

    /// The periodic drain interval.
    pub fn drain_period(&self) -> Duration {
        Duration::from_millis(self.drain_period_millis)
    }
}

impl Default for LoadQueueConfig {
    fn default() -> Self {
        Self {
            max_outstanding: 10,
            command_timeout_millis: 15 * 60 * 1000,
            drain_period_millis: 1000,
        }
    }
}

/// Describes a single historical server.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    /// The unique name of the server.
    pub name: String,
    /// The address on which the server accepts commands.
    pub address: SocketAddr,
    /// The tier that the server belongs to.
    #[serde(default = "default_tier")]
    pub tier: String,
    /// The type of the server.
    #[serde(default)]
    pub server_type: ServerType,
    /// The maximum number of bytes that the server can hold.
    pub max_size: u64,
    /// Servers with a higher priority are preferred for queries.
    #[serde(default)]
    pub priority: i32,
    /// Segments that the server already holds when it starts up.
    #[serde(default)]
    pub segment_cache_file: Option<PathBuf>,
}

fn default_tier() -> String {
    crate::DEFAULT_TIER.to_owned()
}
