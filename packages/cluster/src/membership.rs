use tokio::sync::broadcast;

use crate::member::{MemberUpdate, NodeInfo, NodeState};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum MembershipEvent {
	Joined(NodeInfo),
	StateChanged(NodeInfo),
	Removed(String),
}

/// Result of applying a gossiped update to the local view.
#[derive(Debug)]
pub enum ApplyOutcome {
	/// The update advanced the local view; re-disseminate it.
	Applied(NodeInfo),
	/// Stale or redundant.
	Ignored,
	/// The update claims the local node is not alive; the caller must
	/// refute with an incarnation above the claimed one.
	NeedsRefute(u64),
}

/// This node's authoritative view of the cluster. Entries are mutated under
/// per-entry locks; cross-node convergence is eventual via gossip.
pub struct Membership {
	local_id: String,
	members: scc::HashMap<String, NodeInfo>,
	events: broadcast::Sender<MembershipEvent>,
}

impl Membership {
	pub fn new(local: NodeInfo) -> Self {
		let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
		let members = scc::HashMap::new();
		let _ = members.insert(local.node_id.clone(), local.clone());

		Membership {
			local_id: local.node_id,
			members,
			events,
		}
	}

	pub fn local_id(&self) -> &str {
		&self.local_id
	}

	pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
		self.events.subscribe()
	}

	pub fn len(&self) -> usize {
		self.members.len()
	}

	pub fn is_empty(&self) -> bool {
		self.members.is_empty()
	}

	pub async fn get(&self, node_id: &str) -> Option<NodeInfo> {
		self.members
			.read_async(node_id, |_, info| info.clone())
			.await
	}

	pub async fn local(&self) -> NodeInfo {
		self.get(&self.local_id)
			.await
			.expect("local node must be in membership")
	}

	pub async fn snapshot(&self) -> Vec<NodeInfo> {
		let mut out = Vec::with_capacity(self.members.len());
		self.members
			.scan_async(|_, info| out.push(info.clone()))
			.await;
		out
	}

	/// Alive peers excluding the local node.
	pub async fn alive_peers(&self) -> Vec<NodeInfo> {
		let mut out = Vec::new();
		self.members
			.scan_async(|node_id, info| {
				if info.state == NodeState::Alive && *node_id != self.local_id {
					out.push(info.clone());
				}
			})
			.await;
		out
	}

	/// Applies a gossiped claim. Precedence: higher incarnation wins; at
	/// equal incarnation the higher-priority state wins; otherwise ignored.
	pub async fn apply_update(&self, update: MemberUpdate) -> ApplyOutcome {
		if update.node_id == self.local_id {
			// Someone claims we are not alive; do not apply, refute instead
			if update.state != NodeState::Alive {
				return ApplyOutcome::NeedsRefute(update.incarnation);
			}
			return ApplyOutcome::Ignored;
		}

		let now = flywheel_util::timestamp::now();
		let entry = self.members.entry_async(update.node_id.clone()).await;

		match entry {
			scc::hash_map::Entry::Occupied(mut occupied) => {
				let existing = occupied.get();
				let advances = update.incarnation > existing.incarnation
					|| (update.incarnation == existing.incarnation
						&& update.state > existing.state);
				if !advances {
					return ApplyOutcome::Ignored;
				}

				let state_changed = update.state != existing.state;
				let info = NodeInfo {
					node_id: update.node_id,
					address: update.address,
					state: update.state,
					incarnation: update.incarnation,
					last_heartbeat: now,
				};
				*occupied.get_mut() = info.clone();

				if state_changed {
					self.emit(MembershipEvent::StateChanged(info.clone()));
				}
				ApplyOutcome::Applied(info)
			}
			scc::hash_map::Entry::Vacant(vacant) => {
				let info = NodeInfo {
					node_id: update.node_id,
					address: update.address,
					state: update.state,
					incarnation: update.incarnation,
					last_heartbeat: now,
				};
				vacant.insert_entry(info.clone());

				tracing::debug!(node_id=%info.node_id, state=%info.state, "node joined");
				self.emit(MembershipEvent::Joined(info.clone()));
				ApplyOutcome::Applied(info)
			}
		}
	}

	/// Reasserts the local node as Alive above a stale claim. Returns the
	/// refutation to disseminate.
	pub async fn refute(&self, claimed_incarnation: u64) -> NodeInfo {
		let updated = self
			.members
			.update_async(&self.local_id, |_, info| {
				info.incarnation = info.incarnation.max(claimed_incarnation) + 1;
				info.state = NodeState::Alive;
				info.last_heartbeat = flywheel_util::timestamp::now();
				info.clone()
			})
			.await
			.expect("local node must be in membership");

		tracing::debug!(incarnation=%updated.incarnation, "refuting stale claim about self");
		self.emit(MembershipEvent::StateChanged(updated.clone()));
		updated
	}

	/// Valid only from Alive. Bumps the incarnation so the claim outranks
	/// the state it was derived from.
	pub async fn mark_suspect(&self, node_id: &str) -> Option<NodeInfo> {
		self.transition(node_id, NodeState::Suspect, |state| {
			state == NodeState::Alive
		})
		.await
	}

	/// Valid from Alive or Suspect.
	pub async fn mark_dead(&self, node_id: &str) -> Option<NodeInfo> {
		self.transition(node_id, NodeState::Dead, |state| {
			matches!(state, NodeState::Alive | NodeState::Suspect)
		})
		.await
	}

	/// Graceful departure announced by the node itself.
	pub async fn mark_left(&self, node_id: &str) -> Option<NodeInfo> {
		self.transition(node_id, NodeState::Left, |state| {
			state != NodeState::Left
		})
		.await
	}

	async fn transition(
		&self,
		node_id: &str,
		to: NodeState,
		valid_from: impl Fn(NodeState) -> bool,
	) -> Option<NodeInfo> {
		if node_id == self.local_id {
			return None;
		}

		let updated = self
			.members
			.update_async(node_id, |_, info| {
				if !valid_from(info.state) {
					return None;
				}
				info.state = to;
				info.incarnation += 1;
				Some(info.clone())
			})
			.await
			.flatten();

		if let Some(info) = &updated {
			tracing::debug!(node_id=%info.node_id, state=%info.state, "membership state changed");
			self.emit(MembershipEvent::StateChanged(info.clone()));
		}
		updated
	}

	/// Purges a node from the table entirely.
	pub async fn remove(&self, node_id: &str) -> bool {
		if node_id == self.local_id {
			return false;
		}

		let removed = self.members.remove_async(node_id).await.is_some();
		if removed {
			tracing::debug!(%node_id, "node removed from membership");
			self.emit(MembershipEvent::Removed(node_id.to_string()));
		}
		removed
	}

	/// A direct message from a node is proof of life. Reinstates a member we
	/// hold as Suspect/Dead/Left above its stale claim, or admits an unknown
	/// sender. Returns the update to disseminate, `None` when nothing
	/// changed.
	pub async fn reinstate(&self, node_id: &str, address: &str) -> Option<NodeInfo> {
		if node_id == self.local_id {
			return None;
		}

		let now = flywheel_util::timestamp::now();
		match self.members.entry_async(node_id.to_string()).await {
			scc::hash_map::Entry::Occupied(mut occupied) => {
				let info = occupied.get_mut();
				info.last_heartbeat = now;
				if info.state == NodeState::Alive {
					return None;
				}

				info.state = NodeState::Alive;
				info.incarnation += 1;
				info.address = address.to_string();
				let info = info.clone();

				tracing::debug!(node_id=%info.node_id, incarnation=%info.incarnation, "reinstating member after direct contact");
				self.emit(MembershipEvent::StateChanged(info.clone()));
				Some(info)
			}
			scc::hash_map::Entry::Vacant(vacant) => {
				let info = NodeInfo {
					node_id: node_id.to_string(),
					address: address.to_string(),
					state: NodeState::Alive,
					incarnation: 0,
					last_heartbeat: now,
				};
				vacant.insert_entry(info.clone());

				tracing::debug!(%node_id, "admitting unknown sender");
				self.emit(MembershipEvent::Joined(info.clone()));
				Some(info)
			}
		}
	}

	pub async fn touch(&self, node_id: &str) {
		self.members
			.update_async(node_id, |_, info| {
				info.last_heartbeat = flywheel_util::timestamp::now();
			})
			.await;
	}

	fn emit(&self, event: MembershipEvent) {
		// No receivers is fine
		let _ = self.events.send(event);
	}
}
