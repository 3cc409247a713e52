use std::{
	collections::HashSet,
	sync::{Arc, Mutex, RwLock},
	time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;

use crate::{
	error::ClusterError,
	proto::Envelope,
	transport::{MessageHandler, Transport},
};

/// Shared registry routing envelopes between in-process transports, with
/// injectable delay, drop probability, and partitions for deterministic
/// cluster tests.
pub struct MemoryHub {
	endpoints: scc::HashMap<String, MessageHandler>,
	partitions: RwLock<Vec<HashSet<String>>>,
	drop_probability: Mutex<f64>,
	delay: Mutex<Duration>,
}

impl MemoryHub {
	pub fn new() -> Arc<Self> {
		Arc::new(MemoryHub {
			endpoints: scc::HashMap::new(),
			partitions: RwLock::new(Vec::new()),
			drop_probability: Mutex::new(0.0),
			delay: Mutex::new(Duration::ZERO),
		})
	}

	/// Splits the network into isolated groups. Addresses in different
	/// groups cannot exchange messages.
	pub fn partition(&self, groups: Vec<Vec<&str>>) {
		let groups = groups
			.into_iter()
			.map(|group| group.into_iter().map(str::to_string).collect())
			.collect();
		*self
			.partitions
			.write()
			.unwrap_or_else(|poisoned| poisoned.into_inner()) = groups;
	}

	pub fn heal_partition(&self) {
		self.partitions
			.write()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.clear();
	}

	pub fn set_drop_probability(&self, probability: f64) {
		*self
			.drop_probability
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner()) = probability;
	}

	pub fn set_delay(&self, delay: Duration) {
		*self
			.delay
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner()) = delay;
	}

	fn connected(&self, a: &str, b: &str) -> bool {
		let partitions = self
			.partitions
			.read()
			.unwrap_or_else(|poisoned| poisoned.into_inner());
		if partitions.is_empty() {
			return true;
		}

		let group_of = |addr: &str| partitions.iter().position(|g| g.contains(addr));
		group_of(a) == group_of(b)
	}

	fn dropped(&self) -> bool {
		let probability = *self
			.drop_probability
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner());
		probability > 0.0 && rand::thread_rng().gen::<f64>() < probability
	}

	fn current_delay(&self) -> Duration {
		*self
			.delay
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	async fn deliver(
		&self,
		from: &str,
		to: &str,
		envelope: Envelope,
	) -> Result<Option<Envelope>> {
		if !self.connected(from, to) || self.dropped() {
			// Lost on the wire; the caller sees a timeout
			return Ok(None);
		}

		let delay = self.current_delay();
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}

		let Some(handler) = self.endpoints.read_async(to, |_, h| h.clone()).await else {
			return Ok(None);
		};

		handler(envelope).await
	}
}

pub struct MemoryTransport {
	hub: Arc<MemoryHub>,
	addr: String,
	handler: std::sync::OnceLock<MessageHandler>,
}

impl MemoryTransport {
	pub fn new(hub: Arc<MemoryHub>, addr: impl Into<String>) -> Self {
		MemoryTransport {
			hub,
			addr: addr.into(),
			handler: std::sync::OnceLock::new(),
		}
	}
}

#[async_trait]
impl Transport for MemoryTransport {
	async fn start(&self) -> Result<()> {
		let handler = self
			.handler
			.get()
			.ok_or(ClusterError::TransportStopped)?
			.clone();
		let _ = self
			.hub
			.endpoints
			.insert_async(self.addr.clone(), handler)
			.await;
		Ok(())
	}

	async fn stop(&self) -> Result<()> {
		self.hub.endpoints.remove_async(&self.addr).await;
		Ok(())
	}

	async fn send(&self, addr: &str, envelope: Envelope) -> Result<()> {
		let hub = self.hub.clone();
		let from = self.addr.clone();
		let to = addr.to_string();

		tokio::spawn(async move {
			if let Err(err) = hub.deliver(&from, &to, envelope).await {
				tracing::debug!(?err, %to, "memory send failed");
			}
		});

		Ok(())
	}

	async fn send_and_receive(
		&self,
		addr: &str,
		envelope: Envelope,
		timeout: Duration,
	) -> Result<Option<Envelope>> {
		match tokio::time::timeout(timeout, self.hub.deliver(&self.addr, addr, envelope)).await {
			Ok(res) => res,
			Err(_) => Ok(None),
		}
	}

	fn set_handler(&self, handler: MessageHandler) {
		let _ = self.handler.set(handler);
	}

	fn local_addr(&self) -> String {
		self.addr.clone()
	}
}
