use anyhow::Result;
use flywheel_kv::{Kv, WriteOp};

use crate::keys::StateKey;

/// Keyed state for all workflows. Reads are not journaled; mutations are
/// journaled by the caller in the same batch as the write.
#[derive(Clone)]
pub struct StateOps {
	kv: Kv,
}

impl StateOps {
	pub(crate) fn new(kv: Kv) -> Self {
		StateOps { kv }
	}

	pub async fn get(&self, workflow_id: &str, key: &str) -> Result<Option<Vec<u8>>> {
		self.kv.get(&StateKey::new(workflow_id, key).pack()).await
	}

	pub async fn set(&self, workflow_id: &str, key: &str, value: &[u8]) -> Result<()> {
		self.kv
			.put(&StateKey::new(workflow_id, key).pack(), value)
			.await
	}

	pub async fn delete(&self, workflow_id: &str, key: &str) -> Result<()> {
		self.kv.delete(&StateKey::new(workflow_id, key).pack()).await
	}

	pub async fn delete_all(&self, workflow_id: &str) -> Result<()> {
		let entries = self
			.kv
			.scan(&StateKey::subspace(workflow_id), None)
			.await?;

		if entries.is_empty() {
			return Ok(());
		}

		let ops = entries
			.into_iter()
			.map(|e| WriteOp::Delete { key: e.key })
			.collect();
		self.kv.batch(ops).await
	}
}
