use std::{
	collections::HashMap,
	ops::Deref,
	sync::{
		Arc, Mutex,
		atomic::{AtomicU64, Ordering},
	},
};

use anyhow::Result;
use futures_util::future::join_all;
use rand::Rng;
use tokio::{sync::watch, task::JoinHandle};
use tracing::Instrument;

use flywheel_config::NodeConfig;

use crate::{
	dissemination::DisseminationBuffer,
	member::MemberUpdate,
	membership::{ApplyOutcome, Membership},
	proto::{Envelope, GossipMessage, Payload},
	transport::Transport,
};

/// Indirect probes per failed direct ping.
const PING_REQ_FANOUT: usize = 3;

/// Every Nth probe also performs a full membership exchange with the peer.
/// Piggybacked updates age out of the dissemination buffer; the periodic
/// sync repairs any view that diverged past the buffer's horizon.
const SYNC_EVERY_PROBES: u64 = 8;

/// SWIM-style failure detector and dissemination driver. One periodic task
/// probes a random alive peer; a second task advances the
/// failed -> suspect -> dead -> evicted ladder on the configured timeouts.
#[derive(Clone)]
pub struct Gossip(Arc<GossipInner>);

pub struct GossipInner {
	config: NodeConfig,
	membership: Arc<Membership>,
	buffer: Arc<DisseminationBuffer>,
	transport: Arc<dyn Transport>,
	seq: AtomicU64,
	/// Peer -> timestamp of the first missed ack since last contact.
	failed_probes: Mutex<HashMap<String, i64>>,
	/// Peer -> timestamp it entered Suspect.
	suspects: Mutex<HashMap<String, i64>>,
	/// Peer -> timestamp it entered Dead; evicted after `dead_timeout`.
	dead: Mutex<HashMap<String, i64>>,
}

impl Deref for Gossip {
	type Target = GossipInner;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl Gossip {
	pub fn new(
		config: NodeConfig,
		membership: Arc<Membership>,
		buffer: Arc<DisseminationBuffer>,
		transport: Arc<dyn Transport>,
	) -> Self {
		Gossip(Arc::new(GossipInner {
			config,
			membership,
			buffer,
			transport,
			seq: AtomicU64::new(0),
			failed_probes: Mutex::new(HashMap::new()),
			suspects: Mutex::new(HashMap::new()),
			dead: Mutex::new(HashMap::new()),
		}))
	}

	pub fn membership(&self) -> &Arc<Membership> {
		&self.membership
	}

	pub fn start(&self, shutdown_rx: watch::Receiver<()>) -> Vec<JoinHandle<()>> {
		vec![
			self.spawn_probe_loop(shutdown_rx.clone()),
			self.spawn_sweep_loop(shutdown_rx),
		]
	}

	fn spawn_probe_loop(&self, mut shutdown_rx: watch::Receiver<()>) -> JoinHandle<()> {
		let gossip = self.clone();

		tokio::spawn(
			async move {
				let mut interval = tokio::time::interval(gossip.config.gossip_interval());
				interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

				loop {
					tokio::select! {
						_ = interval.tick() => {}
						_ = shutdown_rx.changed() => break,
					}

					gossip.probe().await;
				}

				tracing::debug!("gossip probe loop stopped");
			}
			.instrument(tracing::info_span!("gossip_probe")),
		)
	}

	fn spawn_sweep_loop(&self, mut shutdown_rx: watch::Receiver<()>) -> JoinHandle<()> {
		let gossip = self.clone();

		tokio::spawn(
			async move {
				let mut interval = tokio::time::interval(gossip.config.gossip_interval());
				interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

				loop {
					tokio::select! {
						_ = interval.tick() => {}
						_ = shutdown_rx.changed() => break,
					}

					gossip.sweep().await;
				}

				tracing::debug!("gossip sweep loop stopped");
			}
			.instrument(tracing::info_span!("gossip_sweep")),
		)
	}

	/// Contacts each seed in turn; the first accepted `JoinAck` bootstraps
	/// the member list. With no reachable seed the node stays a cluster of
	/// one.
	#[tracing::instrument(skip_all)]
	pub async fn join_seeds(&self) -> Result<bool> {
		let local = self.membership.local().await;
		self.buffer.add(local.update());

		let timeout = self.config.gossip_interval() * 2;
		for seed in &self.config.seed_nodes {
			if *seed == local.address {
				continue;
			}

			let envelope = Envelope::gossip(
				&local.node_id,
				&local.address,
				GossipMessage::Join {
					info: local.update(),
				},
			);

			match self
				.transport
				.send_and_receive(seed, envelope, timeout)
				.await
			{
				Ok(Some(reply)) => {
					if let Payload::Gossip(GossipMessage::JoinAck { accepted, members }) =
						reply.payload
					{
						if accepted {
							tracing::info!(%seed, members=%members.len(), "joined cluster via seed");
							self.merge_updates(members).await;

							// Push our view back so the seed can refute any
							// stale claims we hold about it or its peers
							let snapshot = self
								.membership
								.snapshot()
								.await
								.iter()
								.map(|m| m.update())
								.collect();
							let sync = Envelope::gossip(
								&local.node_id,
								&local.address,
								GossipMessage::SyncResponse { members: snapshot },
							);
							if let Err(err) = self.transport.send(seed, sync).await {
								tracing::debug!(?err, %seed, "post-join sync push failed");
							}

							return Ok(true);
						}
					}
				}
				Ok(None) => {
					tracing::debug!(%seed, "seed did not answer");
				}
				Err(err) => {
					tracing::debug!(?err, %seed, "seed join failed");
				}
			}
		}

		tracing::info!("no seeds reachable, starting as a cluster of one");
		Ok(false)
	}

	/// Announces a graceful departure to every alive peer.
	#[tracing::instrument(skip_all)]
	pub async fn leave(&self) {
		let local = self.membership.local().await;
		let peers = self.membership.alive_peers().await;

		for peer in peers {
			let envelope = Envelope::gossip(
				&local.node_id,
				&local.address,
				GossipMessage::Leave {
					node_id: local.node_id.clone(),
				},
			);

			if let Err(err) = self.transport.send(&peer.address, envelope).await {
				tracing::debug!(?err, peer=%peer.node_id, "leave notification failed");
			}
		}
	}

	/// One round: ping a random alive peer, fall back to indirect probes,
	/// record the miss for the sweep to escalate.
	async fn probe(&self) {
		let peers = self.membership.alive_peers().await;

		let Some(peer) = pick_random(&peers) else {
			// Isolated: if seeds are configured, try to rejoin the cluster.
			// This is the heal path after a partition marked everyone dead.
			if !self.config.seed_nodes.is_empty() {
				if let Err(err) = self.join_seeds().await {
					tracing::debug!(?err, "rejoin attempt failed");
				}
			}
			return;
		};

		let local = self.membership.local().await;
		let seq = self.seq.fetch_add(1, Ordering::Relaxed);
		let updates = self.buffer.get_updates(self.membership.len());
		let envelope = Envelope::gossip(
			&local.node_id,
			&local.address,
			GossipMessage::Ping { seq, updates },
		);

		let timeout = self.config.gossip_interval() * 2;
		let reply = self
			.transport
			.send_and_receive(&peer.address, envelope, timeout)
			.await;

		match reply {
			Ok(Some(Envelope {
				payload: Payload::Gossip(GossipMessage::Ack { updates, .. }),
				..
			})) => {
				self.membership.touch(&peer.node_id).await;
				self.clear_detector(&peer.node_id);
				self.merge_updates(updates).await;

				if seq % SYNC_EVERY_PROBES == 0 {
					self.sync_with(&local.update(), &peer.address).await;
				}
			}
			_ => {
				tracing::debug!(peer=%peer.node_id, %seq, "direct probe missed, probing indirectly");
				if self.probe_indirect(&local.update(), &peer, seq).await {
					self.membership.touch(&peer.node_id).await;
					self.clear_detector(&peer.node_id);
				} else {
					self.record_missed_ack(&peer.node_id);
				}
			}
		}
	}

	/// Full membership exchange with one peer.
	async fn sync_with(&self, local: &MemberUpdate, addr: &str) {
		let envelope = Envelope::gossip(&local.node_id, &local.address, GossipMessage::SyncRequest);

		let reply = self
			.transport
			.send_and_receive(addr, envelope, self.config.gossip_interval() * 2)
			.await;

		if let Ok(Some(Envelope {
			payload: Payload::Gossip(GossipMessage::SyncResponse { members }),
			..
		})) = reply
		{
			tracing::debug!(%addr, members=%members.len(), "merged full sync");
			self.merge_updates(members).await;
		}
	}

	/// Asks up to `PING_REQ_FANOUT` other alive peers to probe the target on
	/// our behalf. True if any of them reaches it.
	async fn probe_indirect(
		&self,
		local: &MemberUpdate,
		target: &crate::member::NodeInfo,
		seq: u64,
	) -> bool {
		let proxies = self
			.membership
			.alive_peers()
			.await
			.into_iter()
			.filter(|p| p.node_id != target.node_id)
			.take(PING_REQ_FANOUT)
			.collect::<Vec<_>>();

		if proxies.is_empty() {
			return false;
		}

		let timeout = self.config.gossip_interval() * 2;
		let exchanges = proxies.iter().map(|proxy| {
			let envelope = Envelope::gossip(
				&local.node_id,
				&local.address,
				GossipMessage::PingReq {
					seq,
					target: target.node_id.clone(),
				},
			);
			self.transport
				.send_and_receive(&proxy.address, envelope, timeout)
		});

		join_all(exchanges).await.into_iter().any(|reply| {
			matches!(
				reply,
				Ok(Some(Envelope {
					payload: Payload::Gossip(GossipMessage::Ack { .. }),
					..
				}))
			)
		})
	}

	/// Handles one inbound gossip message, returning the reply to send on
	/// the same exchange.
	pub async fn handle(
		&self,
		sender_id: &str,
		sender_addr: &str,
		message: GossipMessage,
	) -> Result<Option<GossipMessage>> {
		// Any direct message is proof the sender is alive
		self.note_contact(sender_id, sender_addr).await;

		let local = self.membership.local().await;

		match message {
			GossipMessage::Ping { seq, updates } => {
				self.merge_updates(updates).await;
				Ok(Some(GossipMessage::Ack {
					seq,
					updates: self.buffer.get_updates(self.membership.len()),
				}))
			}
			GossipMessage::PingReq { seq, target } => {
				let Some(target_info) = self.membership.get(&target).await else {
					return Ok(Some(GossipMessage::Nack { seq }));
				};

				let envelope = Envelope::gossip(
					&local.node_id,
					&local.address,
					GossipMessage::Ping {
						seq,
						updates: Vec::new(),
					},
				);
				let reply = self
					.transport
					.send_and_receive(
						&target_info.address,
						envelope,
						self.config.gossip_interval(),
					)
					.await;

				let reached = matches!(
					reply,
					Ok(Some(Envelope {
						payload: Payload::Gossip(GossipMessage::Ack { .. }),
						..
					}))
				);
				Ok(Some(if reached {
					GossipMessage::Ack {
						seq,
						updates: Vec::new(),
					}
				} else {
					GossipMessage::Nack { seq }
				}))
			}
			GossipMessage::Join { info } => {
				tracing::info!(node_id=%info.node_id, "node joining");
				self.merge_one(info).await;

				let members = self
					.membership
					.snapshot()
					.await
					.iter()
					.map(|m| m.update())
					.collect();
				Ok(Some(GossipMessage::JoinAck {
					accepted: true,
					members,
				}))
			}
			GossipMessage::Leave { node_id } => {
				tracing::info!(%node_id, "node leaving");
				if let Some(info) = self.membership.mark_left(&node_id).await {
					self.buffer.add(info.update());
				}
				Ok(None)
			}
			GossipMessage::SyncRequest => {
				let members = self
					.membership
					.snapshot()
					.await
					.iter()
					.map(|m| m.update())
					.collect();
				Ok(Some(GossipMessage::SyncResponse { members }))
			}
			GossipMessage::SyncResponse { members } => {
				self.merge_updates(members).await;
				Ok(None)
			}
			// Responses to exchanges we initiated; nothing arrives here
			// unsolicited that we should act on
			GossipMessage::Ack { updates, .. } => {
				self.merge_updates(updates).await;
				Ok(None)
			}
			GossipMessage::JoinAck { .. } | GossipMessage::Nack { .. } => Ok(None),
		}
	}

	/// Applies sender liveness before touching the message itself.
	pub async fn note_contact(&self, sender_id: &str, sender_addr: &str) {
		if let Some(info) = self.membership.reinstate(sender_id, sender_addr).await {
			self.buffer.add(info.update());
		}
		self.clear_detector(sender_id);
	}

	pub async fn merge_updates(&self, updates: Vec<MemberUpdate>) {
		for update in updates {
			self.merge_one(update).await;
		}
	}

	async fn merge_one(&self, update: MemberUpdate) {
		match self.membership.apply_update(update).await {
			ApplyOutcome::Applied(info) => {
				if info.state == crate::member::NodeState::Alive {
					self.clear_detector(&info.node_id);
				}
				// Keep the rumor moving
				self.buffer.add(info.update());
			}
			ApplyOutcome::NeedsRefute(claimed) => {
				let refutation = self.membership.refute(claimed).await;
				self.buffer.add(refutation.update());
			}
			ApplyOutcome::Ignored => {}
		}
	}

	/// Escalates detector state: missed acks become Suspect after
	/// `suspect_timeout`, suspects become Dead after `dead_timeout`, dead
	/// members are evicted after another `dead_timeout`.
	async fn sweep(&self) {
		let now = flywheel_util::timestamp::now();
		let suspect_timeout = self.config.suspect_timeout().as_millis() as i64;
		let dead_timeout = self.config.dead_timeout().as_millis() as i64;

		let to_suspect = drain_due(&self.failed_probes, now, suspect_timeout);
		for node_id in to_suspect {
			if let Some(info) = self.membership.mark_suspect(&node_id).await {
				tracing::warn!(%node_id, "peer unresponsive, marking suspect");
				self.buffer.add(info.update());
				self.suspects
					.lock()
					.unwrap_or_else(|poisoned| poisoned.into_inner())
					.insert(node_id, now);
			}
		}

		let to_kill = drain_due(&self.suspects, now, dead_timeout);
		for node_id in to_kill {
			if let Some(info) = self.membership.mark_dead(&node_id).await {
				tracing::warn!(%node_id, "suspect timed out, marking dead");
				self.buffer.add(info.update());
			}
			self.dead
				.lock()
				.unwrap_or_else(|poisoned| poisoned.into_inner())
				.insert(node_id, now);
		}

		let to_evict = drain_due(&self.dead, now, dead_timeout);
		for node_id in to_evict {
			self.membership.remove(&node_id).await;
		}
	}

	fn record_missed_ack(&self, node_id: &str) {
		self.failed_probes
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.entry(node_id.to_string())
			.or_insert_with(flywheel_util::timestamp::now);
	}

	fn clear_detector(&self, node_id: &str) {
		self.failed_probes
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.remove(node_id);
		self.suspects
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.remove(node_id);
		self.dead
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.remove(node_id);
	}
}

fn pick_random<T: Clone>(items: &[T]) -> Option<T> {
	if items.is_empty() {
		return None;
	}
	let idx = rand::thread_rng().gen_range(0..items.len());
	Some(items[idx].clone())
}

fn drain_due(map: &Mutex<HashMap<String, i64>>, now: i64, timeout: i64) -> Vec<String> {
	let mut map = map.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
	let due = map
		.iter()
		.filter(|(_, since)| now - **since >= timeout)
		.map(|(node_id, _)| node_id.clone())
		.collect::<Vec<_>>();
	for node_id in &due {
		map.remove(node_id);
	}
	due
}
