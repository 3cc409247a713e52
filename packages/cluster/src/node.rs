use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::value::RawValue;
use tokio::{sync::watch, task::JoinHandle};
use tracing::Instrument;

use flywheel_config::NodeConfig;
use flywheel_storage::WorkflowMetadata;

use crate::{
	dissemination::DisseminationBuffer,
	error::ClusterError,
	gossip::Gossip,
	member::{NodeInfo, NodeState},
	membership::{Membership, MembershipEvent},
	proto::{Envelope, Payload, RpcRequest, RpcResponse},
	ring::HashRing,
	transport::{MessageHandler, Transport},
};

const DISSEMINATION_MAX_UPDATES: usize = 16;

/// The runtime operations the cluster routes to the owning node. Implemented
/// by the node binary over the local durable runtime.
#[async_trait]
pub trait LocalExecutor: Send + Sync {
	async fn submit(
		&self,
		workflow_type: &str,
		workflow_id: &str,
		input: Box<RawValue>,
	) -> Result<WorkflowMetadata>;

	async fn get_status(&self, workflow_id: &str) -> Result<Option<WorkflowMetadata>>;

	async fn cancel(&self, workflow_id: &str) -> Result<bool>;

	async fn signal(
		&self,
		workflow_id: &str,
		signal: &str,
		payload: Option<Box<RawValue>>,
	) -> Result<WorkflowMetadata>;
}

enum Route {
	Local,
	Remote(String, String),
}

/// One node's view of the cluster: membership, ring, gossip, and the
/// ownership-aware dispatch for cluster-visible operations.
#[derive(Clone)]
pub struct ClusterNode {
	node_id: String,
	config: NodeConfig,
	membership: Arc<Membership>,
	ring: Arc<HashRing>,
	gossip: Gossip,
	transport: Arc<dyn Transport>,
	executor: Arc<dyn LocalExecutor>,
}

impl ClusterNode {
	pub fn new(
		node_id: impl Into<String>,
		config: NodeConfig,
		transport: Arc<dyn Transport>,
		executor: Arc<dyn LocalExecutor>,
	) -> Self {
		let node_id = node_id.into();
		let local = NodeInfo::alive(node_id.clone(), transport.local_addr());

		let membership = Arc::new(Membership::new(local));
		let buffer = Arc::new(DisseminationBuffer::new(DISSEMINATION_MAX_UPDATES));
		let ring = Arc::new(HashRing::new(config.virtual_nodes_per_node()));
		ring.add_node(&node_id);

		let gossip = Gossip::new(
			config.clone(),
			membership.clone(),
			buffer,
			transport.clone(),
		);

		let node = ClusterNode {
			node_id,
			config,
			membership,
			ring,
			gossip,
			transport,
			executor,
		};

		node.transport.set_handler(node.message_handler());
		node
	}

	pub fn node_id(&self) -> &str {
		&self.node_id
	}

	pub fn membership(&self) -> &Arc<Membership> {
		&self.membership
	}

	pub fn ring(&self) -> &Arc<HashRing> {
		&self.ring
	}

	pub fn gossip(&self) -> &Gossip {
		&self.gossip
	}

	/// Starts transport, joins via seeds, and launches the gossip tasks plus
	/// the membership-to-ring event pump.
	pub async fn start(&self, shutdown_rx: watch::Receiver<()>) -> Result<Vec<JoinHandle<()>>> {
		self.transport.start().await?;

		let mut handles = vec![self.spawn_event_pump(shutdown_rx.clone())];

		self.gossip.join_seeds().await?;
		handles.extend(self.gossip.start(shutdown_rx));

		Ok(handles)
	}

	/// Gracefully leaves the cluster and stops the transport.
	pub async fn stop(&self) -> Result<()> {
		self.gossip.leave().await;
		self.transport.stop().await
	}

	/// Mutates the ring as membership changes: nodes enter on Alive, leave
	/// on Dead/Left/eviction. Suspects stay owners until the verdict.
	fn spawn_event_pump(&self, mut shutdown_rx: watch::Receiver<()>) -> JoinHandle<()> {
		let mut events = self.membership.subscribe();
		let ring = self.ring.clone();

		tokio::spawn(
			async move {
				loop {
					tokio::select! {
						_ = shutdown_rx.changed() => break,
						event = events.recv() => match event {
							Ok(MembershipEvent::Joined(info)) => {
								if info.state == NodeState::Alive {
									ring.add_node(&info.node_id);
								}
							}
							Ok(MembershipEvent::StateChanged(info)) => match info.state {
								NodeState::Alive => ring.add_node(&info.node_id),
								NodeState::Suspect => {}
								NodeState::Dead | NodeState::Left => {
									ring.remove_node(&info.node_id)
								}
							},
							Ok(MembershipEvent::Removed(node_id)) => {
								ring.remove_node(&node_id);
							}
							Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
								tracing::warn!(%skipped, "membership event pump lagged");
							}
							Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
						},
					}
				}

				tracing::debug!("event pump stopped");
			}
			.instrument(tracing::info_span!("ring_event_pump")),
		)
	}

	fn message_handler(&self) -> MessageHandler {
		let node = self.clone();

		Arc::new(move |envelope: Envelope| {
			let node = node.clone();
			async move {
				match envelope.payload {
					Payload::Gossip(message) => {
						let reply = node
							.gossip
							.handle(&envelope.sender_id, &envelope.sender_addr, message)
							.await?;
						Ok(reply.map(|message| {
							Envelope::gossip(
								&node.node_id,
								&node.transport.local_addr(),
								message,
							)
						}))
					}
					Payload::Rpc(request) => {
						node.gossip
							.note_contact(&envelope.sender_id, &envelope.sender_addr)
							.await;
						let response = node.handle_rpc(request).await;
						Ok(Some(Envelope::rpc_reply(
							&node.node_id,
							&node.transport.local_addr(),
							response,
						)))
					}
					Payload::RpcReply(_) => Ok(None),
				}
			}
			.boxed()
		})
	}

	/// Executes a forwarded operation, refusing keys this node does not own
	/// (the caller's ring was stale).
	async fn handle_rpc(&self, request: RpcRequest) -> RpcResponse {
		let workflow_id = request.workflow_id().to_string();
		match self.ring.get_node(&workflow_id) {
			Some(owner) if owner == self.node_id => {}
			_ => {
				tracing::debug!(%workflow_id, "refusing rpc for key we do not own");
				return RpcResponse::NotOwner;
			}
		}

		let res = match request {
			RpcRequest::Submit {
				workflow_type,
				workflow_id,
				input,
			} => self
				.executor
				.submit(&workflow_type, &workflow_id, input)
				.await
				.map(|metadata| RpcResponse::Submitted { metadata }),
			RpcRequest::GetStatus { workflow_id } => self
				.executor
				.get_status(&workflow_id)
				.await
				.map(|metadata| RpcResponse::Status { metadata }),
			RpcRequest::Cancel { workflow_id } => self
				.executor
				.cancel(&workflow_id)
				.await
				.map(|accepted| RpcResponse::Cancelled { accepted }),
			RpcRequest::Signal {
				workflow_id,
				signal,
				payload,
			} => self
				.executor
				.signal(&workflow_id, &signal, payload)
				.await
				.map(|metadata| RpcResponse::Signalled { metadata }),
		};

		res.unwrap_or_else(|err| RpcResponse::Error {
			message: err.to_string(),
		})
	}

	async fn route(&self, workflow_id: &str) -> Result<Route> {
		let owner = self
			.ring
			.get_node(workflow_id)
			.ok_or(ClusterError::RingEmpty)?;

		if owner == self.node_id {
			return Ok(Route::Local);
		}

		let info = self
			.membership
			.get(&owner)
			.await
			.ok_or_else(|| ClusterError::UnknownNode(owner.clone()))?;
		Ok(Route::Remote(owner, info.address))
	}

	async fn rpc(&self, owner: &str, addr: &str, request: RpcRequest) -> Result<RpcResponse> {
		let envelope = Envelope::rpc(&self.node_id, &self.transport.local_addr(), request);

		let reply = self
			.transport
			.send_and_receive(addr, envelope, self.config.rpc_timeout())
			.await?;

		match reply {
			Some(Envelope {
				payload: Payload::RpcReply(response),
				..
			}) => match response {
				RpcResponse::NotOwner => Err(ClusterError::Unavailable(owner.to_string()).into()),
				response => Ok(response),
			},
			Some(_) => Err(ClusterError::UnexpectedResponse(
				"non-rpc payload on rpc channel".to_string(),
			)
			.into()),
			None => Err(ClusterError::Unavailable(owner.to_string()).into()),
		}
	}

	/// Routes a submit to the key's owner. Generates the workflow id here
	/// when absent, because ownership is a function of the id.
	#[tracing::instrument(skip_all, fields(%workflow_type))]
	pub async fn submit(
		&self,
		workflow_type: &str,
		workflow_id: Option<String>,
		input: Box<RawValue>,
	) -> Result<WorkflowMetadata> {
		let workflow_id = workflow_id.unwrap_or_else(flywheel_util::id::generate);

		match self.route(&workflow_id).await? {
			Route::Local => self.executor.submit(workflow_type, &workflow_id, input).await,
			Route::Remote(owner, addr) => {
				tracing::debug!(%workflow_id, %owner, "forwarding submit");
				let response = self
					.rpc(
						&owner,
						&addr,
						RpcRequest::Submit {
							workflow_type: workflow_type.to_string(),
							workflow_id,
							input,
						},
					)
					.await?;
				match response {
					RpcResponse::Submitted { metadata } => Ok(metadata),
					RpcResponse::Error { message } => Err(anyhow::anyhow!(message)),
					other => Err(ClusterError::UnexpectedResponse(format!("{other:?}")).into()),
				}
			}
		}
	}

	#[tracing::instrument(skip_all, fields(%workflow_id))]
	pub async fn get_status(&self, workflow_id: &str) -> Result<Option<WorkflowMetadata>> {
		match self.route(workflow_id).await? {
			Route::Local => self.executor.get_status(workflow_id).await,
			Route::Remote(owner, addr) => {
				let response = self
					.rpc(
						&owner,
						&addr,
						RpcRequest::GetStatus {
							workflow_id: workflow_id.to_string(),
						},
					)
					.await?;
				match response {
					RpcResponse::Status { metadata } => Ok(metadata),
					RpcResponse::Error { message } => Err(anyhow::anyhow!(message)),
					other => Err(ClusterError::UnexpectedResponse(format!("{other:?}")).into()),
				}
			}
		}
	}

	#[tracing::instrument(skip_all, fields(%workflow_id))]
	pub async fn cancel(&self, workflow_id: &str) -> Result<bool> {
		match self.route(workflow_id).await? {
			Route::Local => self.executor.cancel(workflow_id).await,
			Route::Remote(owner, addr) => {
				let response = self
					.rpc(
						&owner,
						&addr,
						RpcRequest::Cancel {
							workflow_id: workflow_id.to_string(),
						},
					)
					.await?;
				match response {
					RpcResponse::Cancelled { accepted } => Ok(accepted),
					RpcResponse::Error { message } => Err(anyhow::anyhow!(message)),
					other => Err(ClusterError::UnexpectedResponse(format!("{other:?}")).into()),
				}
			}
		}
	}

	#[tracing::instrument(skip_all, fields(%workflow_id, %signal))]
	pub async fn signal(
		&self,
		workflow_id: &str,
		signal: &str,
		payload: Option<Box<RawValue>>,
	) -> Result<WorkflowMetadata> {
		match self.route(workflow_id).await? {
			Route::Local => self.executor.signal(workflow_id, signal, payload).await,
			Route::Remote(owner, addr) => {
				let response = self
					.rpc(
						&owner,
						&addr,
						RpcRequest::Signal {
							workflow_id: workflow_id.to_string(),
							signal: signal.to_string(),
							payload,
						},
					)
					.await?;
				match response {
					RpcResponse::Signalled { metadata } => Ok(metadata),
					RpcResponse::Error { message } => Err(anyhow::anyhow!(message)),
					other => Err(ClusterError::UnexpectedResponse(format!("{other:?}")).into()),
				}
			}
		}
	}
}
