use std::{
	sync::{Arc, Mutex},
	time::{Duration, Instant},
};

use anyhow::Result;
use async_trait::async_trait;
use flywheel_cluster::{ClusterNode, LocalExecutor, MemoryHub, MemoryTransport};
use flywheel_config::NodeConfig;
use flywheel_storage::{WorkflowMetadata, WorkflowStatus};
use serde_json::value::RawValue;
use tokio::{sync::watch, task::JoinHandle};

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter("debug")
		.with_test_writer()
		.try_init();
}

pub fn test_config(seeds: &[&str]) -> NodeConfig {
	serde_json::from_value(serde_json::json!({
		"seed_nodes": seeds,
		"gossip_interval": 50,
		"suspect_timeout": 150,
		"dead_timeout": 300,
		"virtual_nodes_per_node": 16,
		"rpc_timeout": 500,
	}))
	.unwrap()
}

/// Executor stub recording which node served each operation.
#[derive(Default)]
pub struct StubExecutor {
	pub node_id: String,
	pub submitted: Mutex<Vec<String>>,
	pub cancelled: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl StubExecutor {
	pub fn new(node_id: &str) -> Arc<Self> {
		Arc::new(StubExecutor {
			node_id: node_id.to_string(),
			..Default::default()
		})
	}

	pub fn submitted_ids(&self) -> Vec<String> {
		self.submitted.lock().unwrap().clone()
	}
}

#[async_trait]
impl LocalExecutor for StubExecutor {
	async fn submit(
		&self,
		workflow_type: &str,
		workflow_id: &str,
		input: Box<RawValue>,
	) -> Result<WorkflowMetadata> {
		self.submitted.lock().unwrap().push(workflow_id.to_string());

		let now = flywheel_util::timestamp::now();
		Ok(WorkflowMetadata {
			workflow_id: workflow_id.to_string(),
			workflow_type: workflow_type.to_string(),
			status: WorkflowStatus::Completed,
			owner_id: Some(self.node_id.clone()),
			input,
			output: Some(RawValue::from_string("\"ok\"".to_string()).unwrap()),
			error_message: None,
			create_ts: now,
			update_ts: now,
			locked_until: None,
			suspended_until: None,
			retry_count: 0,
			max_retries: 3,
		})
	}

	async fn get_status(&self, _workflow_id: &str) -> Result<Option<WorkflowMetadata>> {
		Ok(None)
	}

	async fn cancel(&self, workflow_id: &str) -> Result<bool> {
		self.cancelled.lock().unwrap().push(workflow_id.to_string());
		Ok(true)
	}

	async fn signal(
		&self,
		workflow_id: &str,
		_signal: &str,
		input: Option<Box<RawValue>>,
	) -> Result<WorkflowMetadata> {
		let payload =
			input.unwrap_or_else(|| RawValue::from_string("null".to_string()).unwrap());
		self.submit("signalled", workflow_id, payload).await
	}
}

pub struct TestNode {
	pub node: ClusterNode,
	pub executor: Arc<StubExecutor>,
	pub shutdown: watch::Sender<()>,
	pub handles: Vec<JoinHandle<()>>,
}

pub async fn start_node(hub: &Arc<MemoryHub>, node_id: &str, seeds: &[&str]) -> TestNode {
	let transport = Arc::new(MemoryTransport::new(hub.clone(), node_id));
	let executor = StubExecutor::new(node_id);
	let node = ClusterNode::new(
		node_id,
		test_config(seeds),
		transport,
		executor.clone(),
	);

	let (shutdown, shutdown_rx) = watch::channel(());
	let handles = node.start(shutdown_rx).await.unwrap();

	TestNode {
		node,
		executor,
		shutdown,
		handles,
	}
}

pub async fn shutdown_node(test_node: TestNode) {
	test_node.node.stop().await.unwrap();
	let _ = test_node.shutdown.send(());
	for handle in test_node.handles {
		let _ = handle.await;
	}
}

/// Polls until `predicate` holds or the deadline passes.
pub async fn wait_until<F, Fut>(what: &str, deadline: Duration, mut predicate: F)
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = bool>,
{
	let start = Instant::now();
	while start.elapsed() < deadline {
		if predicate().await {
			return;
		}
		tokio::time::sleep(Duration::from_millis(25)).await;
	}
	panic!("timed out waiting for: {what}");
}
