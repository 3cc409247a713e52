use anyhow::Result;
use async_trait::async_trait;
use serde_json::value::RawValue;

use flywheel_cluster::LocalExecutor;
use flywheel_runtime::Runtime;
use flywheel_storage::WorkflowMetadata;

/// Bridges the cluster dispatch onto the local durable runtime.
pub struct RuntimeExecutor {
	runtime: Runtime,
}

impl RuntimeExecutor {
	pub fn new(runtime: Runtime) -> Self {
		RuntimeExecutor { runtime }
	}
}

#[async_trait]
impl LocalExecutor for RuntimeExecutor {
	async fn submit(
		&self,
		workflow_type: &str,
		workflow_id: &str,
		input: Box<RawValue>,
	) -> Result<WorkflowMetadata> {
		self.runtime
			.submit(workflow_type, Some(workflow_id.to_string()), input)
			.await
	}

	async fn get_status(&self, workflow_id: &str) -> Result<Option<WorkflowMetadata>> {
		self.runtime.get(workflow_id).await
	}

	async fn cancel(&self, workflow_id: &str) -> Result<bool> {
		self.runtime.cancel(workflow_id).await
	}

	async fn signal(
		&self,
		workflow_id: &str,
		signal: &str,
		payload: Option<Box<RawValue>>,
	) -> Result<WorkflowMetadata> {
		self.runtime.signal(workflow_id, signal, payload).await
	}
}
