use std::{
	net::SocketAddr,
	path::{Path, PathBuf},
	time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Node configuration. Every field is optional in the file; accessors apply
/// the documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct NodeConfig {
	/// Identity used on the ring and in gossip. Generated when unset.
	pub node_id: Option<String>,
	/// Cluster transport listen endpoint (gossip + peer RPC).
	pub bind_addr: Option<SocketAddr>,
	/// Service API listen endpoint.
	pub api_addr: Option<SocketAddr>,
	/// Bootstrap endpoints. Empty means a solo cluster.
	#[serde(default)]
	pub seed_nodes: Vec<String>,
	/// Period between gossip pings (in milliseconds). Defaults to 1 s.
	gossip_interval: Option<u64>,
	/// Time from first missed ack to Suspect (in milliseconds). Defaults to
	/// 5 s.
	suspect_timeout: Option<u64>,
	/// Time from Suspect to Dead (in milliseconds). Defaults to 30 s.
	dead_timeout: Option<u64>,
	/// Ring positions per physical node. Defaults to 150.
	virtual_nodes_per_node: Option<usize>,
	/// Default peer RPC timeout (in milliseconds). Defaults to 30 s.
	rpc_timeout: Option<u64>,
	/// Timer processor period (in milliseconds). Defaults to 100 ms.
	timer_poll_interval: Option<u64>,
	/// Recovery scan period (in milliseconds). Defaults to 1 s.
	recovery_poll_interval: Option<u64>,
	/// Soft cap on in-flight handler executions. Defaults to 1024.
	max_concurrent_workflows: Option<usize>,
	/// Root directory for the on-disk store. Unset means in-memory.
	pub storage_path: Option<PathBuf>,
}

impl NodeConfig {
	/// Reads a JSON config file. A missing path yields the defaults.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let Some(path) = path else {
			return Ok(Self::default());
		};

		let raw = std::fs::read_to_string(path)
			.with_context(|| format!("failed to read config at {}", path.display()))?;
		serde_json::from_str(&raw)
			.with_context(|| format!("failed to parse config at {}", path.display()))
	}

	pub fn gossip_interval(&self) -> Duration {
		Duration::from_millis(self.gossip_interval.unwrap_or(1_000))
	}

	pub fn suspect_timeout(&self) -> Duration {
		Duration::from_millis(self.suspect_timeout.unwrap_or(5_000))
	}

	pub fn dead_timeout(&self) -> Duration {
		Duration::from_millis(self.dead_timeout.unwrap_or(30_000))
	}

	pub fn virtual_nodes_per_node(&self) -> usize {
		self.virtual_nodes_per_node.unwrap_or(150)
	}

	pub fn rpc_timeout(&self) -> Duration {
		Duration::from_millis(self.rpc_timeout.unwrap_or(30_000))
	}

	pub fn timer_poll_interval(&self) -> Duration {
		Duration::from_millis(self.timer_poll_interval.unwrap_or(100))
	}

	pub fn recovery_poll_interval(&self) -> Duration {
		Duration::from_millis(self.recovery_poll_interval.unwrap_or(1_000))
	}

	pub fn max_concurrent_workflows(&self) -> usize {
		self.max_concurrent_workflows.unwrap_or(1024)
	}

	/// The configured node id, or a freshly generated one.
	pub fn resolve_node_id(&self) -> String {
		self.node_id
			.clone()
			.unwrap_or_else(|| flywheel_util::id::generate_with_prefix("node"))
	}
}
