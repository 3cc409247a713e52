pub mod dissemination;
pub mod error;
pub mod gossip;
pub mod member;
pub mod membership;
pub mod node;
pub mod proto;
pub mod ring;
pub mod transport;

pub use crate::{
	dissemination::DisseminationBuffer,
	error::ClusterError,
	gossip::Gossip,
	member::{MemberUpdate, NodeInfo, NodeState},
	membership::{ApplyOutcome, Membership, MembershipEvent},
	node::{ClusterNode, LocalExecutor},
	proto::{Envelope, GossipMessage, Payload, RpcRequest, RpcResponse},
	ring::HashRing,
	transport::{
		MessageHandler, Transport,
		http::HttpTransport,
		memory::{MemoryHub, MemoryTransport},
	},
};
