use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use flywheel_storage::WorkflowMetadata;

use crate::member::MemberUpdate;

/// SWIM protocol messages. `Ping`/`Ack` piggyback a bounded set of
/// membership updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GossipMessage {
	Ping {
		seq: u64,
		updates: Vec<MemberUpdate>,
	},
	Ack {
		seq: u64,
		updates: Vec<MemberUpdate>,
	},
	/// Ask the recipient to probe `target` on our behalf.
	PingReq {
		seq: u64,
		target: String,
	},
	Nack {
		seq: u64,
	},
	Join {
		info: MemberUpdate,
	},
	JoinAck {
		accepted: bool,
		members: Vec<MemberUpdate>,
	},
	Leave {
		node_id: String,
	},
	SyncRequest,
	SyncResponse {
		members: Vec<MemberUpdate>,
	},
}

/// Ownership-routed operations forwarded to the owning node. Carried on a
/// channel separate from gossip so slow workflow operations cannot block
/// failure detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RpcRequest {
	Submit {
		workflow_type: String,
		workflow_id: String,
		input: Box<RawValue>,
	},
	GetStatus {
		workflow_id: String,
	},
	Cancel {
		workflow_id: String,
	},
	Signal {
		workflow_id: String,
		signal: String,
		payload: Option<Box<RawValue>>,
	},
}

impl RpcRequest {
	pub fn workflow_id(&self) -> &str {
		match self {
			RpcRequest::Submit { workflow_id, .. }
			| RpcRequest::GetStatus { workflow_id }
			| RpcRequest::Cancel { workflow_id }
			| RpcRequest::Signal { workflow_id, .. } => workflow_id,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RpcResponse {
	Submitted { metadata: WorkflowMetadata },
	Status { metadata: Option<WorkflowMetadata> },
	Cancelled { accepted: bool },
	Signalled { metadata: WorkflowMetadata },
	/// The recipient does not own the key; the caller's ring is stale.
	NotOwner,
	Error { message: String },
}

/// Everything on the wire is a framed unit envelope: sender identity plus
/// one message variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
	Gossip(GossipMessage),
	Rpc(RpcRequest),
	RpcReply(RpcResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
	pub sender_id: String,
	pub sender_addr: String,
	pub payload: Payload,
}

impl Envelope {
	pub fn gossip(sender_id: &str, sender_addr: &str, message: GossipMessage) -> Self {
		Envelope {
			sender_id: sender_id.to_string(),
			sender_addr: sender_addr.to_string(),
			payload: Payload::Gossip(message),
		}
	}

	pub fn rpc(sender_id: &str, sender_addr: &str, request: RpcRequest) -> Self {
		Envelope {
			sender_id: sender_id.to_string(),
			sender_addr: sender_addr.to_string(),
			payload: Payload::Rpc(request),
		}
	}

	pub fn rpc_reply(sender_id: &str, sender_addr: &str, response: RpcResponse) -> Self {
		Envelope {
			sender_id: sender_id.to_string(),
			sender_addr: sender_addr.to_string(),
			payload: Payload::RpcReply(response),
		}
	}
}
