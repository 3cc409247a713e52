use serde::{Deserialize, Serialize};

/// Failure-detector state for one node. The declaration order doubles as the
/// conflict-resolution priority at equal incarnations:
/// Alive < Suspect < Dead < Left.
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	PartialOrd,
	Ord,
	Hash,
	Serialize,
	Deserialize,
	strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeState {
	Alive,
	Suspect,
	Dead,
	Left,
}

/// Local view of one cluster node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
	pub node_id: String,
	/// Transport address (`host:port`).
	pub address: String,
	pub state: NodeState,
	/// Per-node version; the owner bumps it to refute stale claims about
	/// itself.
	pub incarnation: u64,
	pub last_heartbeat: i64,
}

impl NodeInfo {
	pub fn alive(node_id: impl Into<String>, address: impl Into<String>) -> Self {
		NodeInfo {
			node_id: node_id.into(),
			address: address.into(),
			state: NodeState::Alive,
			incarnation: 0,
			last_heartbeat: flywheel_util::timestamp::now(),
		}
	}

	/// The projection carried in gossip messages.
	pub fn update(&self) -> MemberUpdate {
		MemberUpdate {
			node_id: self.node_id.clone(),
			address: self.address.clone(),
			state: self.state,
			incarnation: self.incarnation,
		}
	}
}

/// A gossiped claim about one node's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberUpdate {
	pub node_id: String,
	pub address: String,
	pub state: NodeState,
	pub incarnation: u64,
}
