use anyhow::{Context, Result};
use flywheel_kv::{Kv, WriteOp};

use crate::{
	keys::{StatusIdxKey, WorkflowKey},
	types::{WorkflowMetadata, WorkflowStatus},
};

/// Workflow metadata plus the status secondary index. Metadata and index are
/// always written in one batch so the index never disagrees with the record.
#[derive(Clone)]
pub struct WorkflowOps {
	kv: Kv,
}

impl WorkflowOps {
	pub(crate) fn new(kv: Kv) -> Self {
		WorkflowOps { kv }
	}

	/// Creates the record iff no workflow with this id exists. Returns false
	/// without writing anything when the id is taken.
	pub async fn create(&self, metadata: &WorkflowMetadata) -> Result<bool> {
		let key = WorkflowKey::new(&metadata.workflow_id).pack();
		if self.kv.get(&key).await?.is_some() {
			return Ok(false);
		}

		self.kv
			.batch(vec![
				WriteOp::Put {
					key,
					value: serde_json::to_vec(metadata)?,
				},
				WriteOp::Put {
					key: StatusIdxKey::new(metadata.status, &metadata.workflow_id).pack(),
					value: Vec::new(),
				},
			])
			.await?;

		Ok(true)
	}

	/// Rewrites the record, moving the status index row if the status
	/// changed. `update_ts` is refreshed here.
	pub async fn update(&self, metadata: &WorkflowMetadata) -> Result<()> {
		let key = WorkflowKey::new(&metadata.workflow_id).pack();
		let prior = self
			.get(&metadata.workflow_id)
			.await?
			.with_context(|| format!("workflow {} does not exist", metadata.workflow_id))?;

		let mut metadata = metadata.clone();
		metadata.update_ts = flywheel_util::timestamp::now();

		let mut ops = Vec::with_capacity(3);
		if prior.status != metadata.status {
			ops.push(WriteOp::Delete {
				key: StatusIdxKey::new(prior.status, &metadata.workflow_id).pack(),
			});
		}
		ops.push(WriteOp::Put {
			key,
			value: serde_json::to_vec(&metadata)?,
		});
		ops.push(WriteOp::Put {
			key: StatusIdxKey::new(metadata.status, &metadata.workflow_id).pack(),
			value: Vec::new(),
		});

		self.kv.batch(ops).await
	}

	pub async fn get(&self, workflow_id: &str) -> Result<Option<WorkflowMetadata>> {
		let raw = self.kv.get(&WorkflowKey::new(workflow_id).pack()).await?;
		match raw {
			Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
			None => Ok(None),
		}
	}

	/// Scans the status index and resolves each id to its record.
	pub async fn find_by_status(
		&self,
		status: WorkflowStatus,
		limit: usize,
	) -> Result<Vec<WorkflowMetadata>> {
		let index_entries = self
			.kv
			.scan(&StatusIdxKey::subspace(status), Some(limit))
			.await?;

		let mut out = Vec::with_capacity(index_entries.len());
		for entry in index_entries {
			let idx = StatusIdxKey::unpack(&entry.key)?;
			// The record may have moved on since the index scan; skip rows
			// whose live status no longer matches.
			if let Some(metadata) = self.get(&idx.workflow_id).await? {
				if metadata.status == status {
					out.push(metadata);
				}
			}
		}

		Ok(out)
	}

	/// Suspended workflows whose wake deadline has passed. Over-fetches the
	/// suspended set, then filters.
	pub async fn find_suspended_ready(
		&self,
		now: i64,
		limit: usize,
	) -> Result<Vec<WorkflowMetadata>> {
		let suspended = self.find_by_status(WorkflowStatus::Suspended, limit * 4).await?;

		Ok(suspended
			.into_iter()
			.filter(|metadata| {
				metadata
					.suspended_until
					.map(|deadline| deadline <= now)
					.unwrap_or(false)
			})
			.take(limit)
			.collect())
	}

	/// Paginated listing over all workflows with optional filters, for the
	/// service API.
	pub async fn list(
		&self,
		status: Option<WorkflowStatus>,
		workflow_type: Option<&str>,
		limit: usize,
		offset: usize,
	) -> Result<Vec<WorkflowMetadata>> {
		let entries = self.kv.scan(&WorkflowKey::entire_subspace(), None).await?;

		let mut out = Vec::new();
		let mut skipped = 0;
		for entry in entries {
			let metadata = serde_json::from_slice::<WorkflowMetadata>(&entry.value)?;

			if let Some(status) = status {
				if metadata.status != status {
					continue;
				}
			}
			if let Some(workflow_type) = workflow_type {
				if metadata.workflow_type != workflow_type {
					continue;
				}
			}

			if skipped < offset {
				skipped += 1;
				continue;
			}

			out.push(metadata);
			if out.len() >= limit {
				break;
			}
		}

		Ok(out)
	}
}
