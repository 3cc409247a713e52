use std::{
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use anyhow::{Context, Result};
use serde_json::value::RawValue;

use flywheel_storage::{JournalEntry, Storage, WorkflowMetadata, WorkflowStatus};

use crate::{ctx::WorkflowCtx, error::WorkflowError, registry::RegistryHandle};

/// Tunables owned by the runtime; the node config maps into this.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
	/// Soft cap on in-flight handler executions.
	pub max_concurrent_workflows: usize,
	/// Execution lease; recovery reclaims Running workflows whose lease
	/// expired.
	pub lease_duration: Duration,
	pub default_max_retries: u32,
}

impl Default for RuntimeConfig {
	fn default() -> Self {
		RuntimeConfig {
			max_concurrent_workflows: 1024,
			lease_duration: Duration::from_secs(30),
			default_max_retries: 3,
		}
	}
}

/// Per-node durable runtime. Handlers execute inline on the caller's task;
/// there is no workflow scheduler. All clones share state.
#[derive(Clone)]
pub struct Runtime {
	node_id: String,
	storage: Storage,
	registry: RegistryHandle,
	config: RuntimeConfig,
	active: Arc<AtomicUsize>,
}

impl Runtime {
	pub fn new(
		node_id: impl Into<String>,
		storage: Storage,
		registry: RegistryHandle,
		config: RuntimeConfig,
	) -> Self {
		Runtime {
			node_id: node_id.into(),
			storage,
			registry,
			config,
			active: Arc::new(AtomicUsize::new(0)),
		}
	}

	pub fn node_id(&self) -> &str {
		&self.node_id
	}

	pub fn storage(&self) -> &Storage {
		&self.storage
	}

	pub fn config(&self) -> &RuntimeConfig {
		&self.config
	}

	/// Number of handler executions currently in flight on this node.
	pub fn active_count(&self) -> usize {
		self.active.load(Ordering::SeqCst)
	}

	/// Creates the workflow and drives it until it completes or suspends.
	/// Generates an id when the caller did not supply one.
	#[tracing::instrument(skip_all, fields(%workflow_type))]
	pub async fn submit(
		&self,
		workflow_type: &str,
		workflow_id: Option<String>,
		input: Box<RawValue>,
	) -> Result<WorkflowMetadata> {
		if !self.registry.has_workflow(workflow_type) {
			return Err(WorkflowError::UnknownWorkflow(workflow_type.to_string()).into());
		}

		let workflow_id = workflow_id.unwrap_or_else(flywheel_util::id::generate);
		let now = flywheel_util::timestamp::now();

		let metadata = WorkflowMetadata {
			workflow_id: workflow_id.clone(),
			workflow_type: workflow_type.to_string(),
			status: WorkflowStatus::Pending,
			owner_id: Some(self.node_id.clone()),
			input,
			output: None,
			error_message: None,
			create_ts: now,
			update_ts: now,
			locked_until: None,
			suspended_until: None,
			retry_count: 0,
			max_retries: self.config.default_max_retries,
		};

		if !self.storage.workflows.create(&metadata).await? {
			return Err(WorkflowError::WorkflowAlreadyExists(workflow_id).into());
		}

		tracing::debug!(%workflow_id, "workflow created");

		self.execute(&workflow_id).await
	}

	/// Re-enters a suspended or reclaimed workflow. Replay walks the journal
	/// so duplicate resumes are safe.
	#[tracing::instrument(skip_all, fields(%workflow_id))]
	pub async fn resume(&self, workflow_id: &str) -> Result<WorkflowMetadata> {
		self.execute(workflow_id).await
	}

	/// Loads the journal, re-invokes the handler from the top, and maps the
	/// outcome onto workflow metadata.
	#[tracing::instrument(skip_all, fields(%workflow_id))]
	async fn execute(&self, workflow_id: &str) -> Result<WorkflowMetadata> {
		let mut metadata = self
			.storage
			.workflows
			.get(workflow_id)
			.await?
			.ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;

		// Terminal states never transition further
		if metadata.status.is_terminal() {
			return Ok(metadata);
		}

		let _slot = self.acquire_slot()?;

		let handler = self.registry.get_workflow(&metadata.workflow_type)?;

		// Take the execution lease
		metadata.status = WorkflowStatus::Running;
		metadata.owner_id = Some(self.node_id.clone());
		metadata.locked_until =
			Some(flywheel_util::timestamp::now() + self.config.lease_duration.as_millis() as i64);
		metadata.suspended_until = None;
		self.storage.workflows.update(&metadata).await?;

		let entries = self.storage.journal.get_all(workflow_id).await?;
		let ctx = WorkflowCtx::new(
			workflow_id.to_string(),
			metadata.workflow_type.clone(),
			self.storage.clone(),
			self.registry.clone(),
			entries,
		);

		let res = handler(ctx, metadata.input.clone()).await;

		// Re-read: a cancel may have landed while the handler ran
		let mut metadata = self
			.storage
			.workflows
			.get(workflow_id)
			.await?
			.with_context(|| format!("workflow {workflow_id} disappeared during execution"))?;
		if metadata.status.is_terminal() {
			return Ok(metadata);
		}

		metadata.locked_until = None;
		match res {
			Ok(output) => {
				tracing::debug!("workflow completed");
				metadata.status = WorkflowStatus::Completed;
				metadata.output = Some(output);
				metadata.owner_id = None;
			}
			Err(err) => match WorkflowError::from_chain(&err) {
				Some(WorkflowError::Sleep(wake_ts)) => {
					tracing::debug!(%wake_ts, "workflow suspended until deadline");
					metadata.status = WorkflowStatus::Suspended;
					metadata.suspended_until = Some(*wake_ts);
				}
				Some(WorkflowError::SignalWait(signal)) => {
					tracing::debug!(%signal, "workflow suspended awaiting signal");
					metadata.status = WorkflowStatus::Suspended;
					metadata.suspended_until = None;
				}
				_ => {
					tracing::warn!(?err, "workflow failed");
					metadata.status = WorkflowStatus::Failed;
					metadata.error_message = Some(err.to_string());
					metadata.owner_id = None;
				}
			},
		}

		self.storage.workflows.update(&metadata).await?;

		Ok(metadata)
	}

	pub async fn get(&self, workflow_id: &str) -> Result<Option<WorkflowMetadata>> {
		self.storage.workflows.get(workflow_id).await
	}

	/// Journal entries with sequence greater than `after`.
	pub async fn events(
		&self,
		workflow_id: &str,
		after: Option<u64>,
	) -> Result<Vec<JournalEntry>> {
		let entries = self.storage.journal.get_all(workflow_id).await?;
		Ok(match after {
			Some(after) => entries
				.into_iter()
				.filter(|e| e.sequence > after)
				.collect(),
			None => entries,
		})
	}

	/// Marks the workflow Cancelled and drops its timers. A running handler
	/// is not preempted; the terminal status is observed at the next resume.
	/// Returns false if the workflow was already terminal.
	#[tracing::instrument(skip_all, fields(%workflow_id))]
	pub async fn cancel(&self, workflow_id: &str) -> Result<bool> {
		let mut metadata = self
			.storage
			.workflows
			.get(workflow_id)
			.await?
			.ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;

		if metadata.status.is_terminal() {
			return Ok(false);
		}

		metadata.status = WorkflowStatus::Cancelled;
		metadata.owner_id = None;
		metadata.locked_until = None;
		metadata.suspended_until = None;
		self.storage.workflows.update(&metadata).await?;

		self.storage.timers.delete_for_workflow(workflow_id).await?;

		tracing::debug!("workflow cancelled");
		Ok(true)
	}

	/// Completes the oldest matching incomplete Signal entry with the
	/// payload and resumes the workflow.
	#[tracing::instrument(skip_all, fields(%workflow_id, signal=%name))]
	pub async fn signal(
		&self,
		workflow_id: &str,
		name: &str,
		payload: Option<Box<RawValue>>,
	) -> Result<WorkflowMetadata> {
		let metadata = self
			.storage
			.workflows
			.get(workflow_id)
			.await?
			.ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;

		if metadata.status.is_terminal() {
			return Err(WorkflowError::NotWaitingForSignal(
				workflow_id.to_string(),
				name.to_string(),
			)
			.into());
		}

		let entries = self.storage.journal.get_all(workflow_id).await?;
		let waiting = entries.iter().find(|e| {
			e.kind == flywheel_storage::JournalEntryKind::Signal && e.name == name && !e.completed
		});

		let Some(waiting) = waiting else {
			return Err(WorkflowError::NotWaitingForSignal(
				workflow_id.to_string(),
				name.to_string(),
			)
			.into());
		};

		let payload = match payload {
			Some(payload) => payload,
			None => serde_json::value::to_raw_value(&serde_json::Value::Null)?,
		};
		self.storage
			.journal
			.complete(workflow_id, waiting.sequence, payload)
			.await?;

		tracing::debug!(sequence=%waiting.sequence, "signal delivered");

		self.execute(workflow_id).await
	}

	fn acquire_slot(&self) -> Result<SlotGuard> {
		let res = self
			.active
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
				if active < self.config.max_concurrent_workflows {
					Some(active + 1)
				} else {
					None
				}
			});

		match res {
			Ok(_) => Ok(SlotGuard(self.active.clone())),
			Err(_) => Err(WorkflowError::Saturated.into()),
		}
	}
}

struct SlotGuard(Arc<AtomicUsize>);

impl Drop for SlotGuard {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::SeqCst);
	}
}
