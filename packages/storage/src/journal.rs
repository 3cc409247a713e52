use anyhow::{Context, Result, bail};
use flywheel_kv::{Kv, WriteOp};
use serde_json::value::RawValue;

use crate::{keys::JournalKey, types::JournalEntry};

/// Journal rows for all workflows, ordered by `(workflow_id, sequence)`.
#[derive(Clone)]
pub struct JournalOps {
	kv: Kv,
}

impl JournalOps {
	pub(crate) fn new(kv: Kv) -> Self {
		JournalOps { kv }
	}

	/// Appends an entry. The entry is written before its effect is performed;
	/// a crash between append and complete leaves a non-completed row that
	/// replay re-executes.
	pub async fn append(&self, workflow_id: &str, entry: &JournalEntry) -> Result<()> {
		let key = JournalKey::new(workflow_id, entry.sequence).pack();
		self.kv.put(&key, &serde_json::to_vec(entry)?).await
	}

	/// Marks the entry at `sequence` completed with its output.
	pub async fn complete(
		&self,
		workflow_id: &str,
		sequence: u64,
		output: Box<RawValue>,
	) -> Result<()> {
		let key = JournalKey::new(workflow_id, sequence).pack();
		let raw = self
			.kv
			.get(&key)
			.await?
			.with_context(|| format!("journal entry {workflow_id}/{sequence} missing"))?;

		let mut entry = serde_json::from_slice::<JournalEntry>(&raw)?;
		if entry.completed {
			bail!("journal entry {workflow_id}/{sequence} already completed");
		}
		entry.output = Some(output);
		entry.completed = true;

		self.kv.put(&key, &serde_json::to_vec(&entry)?).await
	}

	/// All entries for a workflow in sequence order.
	pub async fn get_all(&self, workflow_id: &str) -> Result<Vec<JournalEntry>> {
		let entries = self
			.kv
			.scan(&JournalKey::subspace(workflow_id), None)
			.await?;

		entries
			.into_iter()
			.map(|e| serde_json::from_slice::<JournalEntry>(&e.value).map_err(Into::into))
			.collect()
	}

	/// Removes the whole journal in a single batch.
	pub async fn delete_all(&self, workflow_id: &str) -> Result<()> {
		let entries = self
			.kv
			.scan(&JournalKey::subspace(workflow_id), None)
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

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use flywheel_kv::MemoryKvDriver;
	use serde_json::value::RawValue;

	use super::*;
	use crate::types::JournalEntryKind;

	fn ops() -> JournalOps {
		JournalOps::new(Kv::new(Arc::new(MemoryKvDriver::new())))
	}

	fn raw(json: &str) -> Box<RawValue> {
		RawValue::from_string(json.to_string()).unwrap()
	}

	#[tokio::test]
	async fn entries_come_back_in_sequence_order() {
		let journal = ops();

		for seq in [2u64, 0, 1] {
			let entry = JournalEntry::new(seq, JournalEntryKind::Call, "svc");
			journal.append("wf", &entry).await.unwrap();
		}

		let entries = journal.get_all("wf").await.unwrap();
		let seqs = entries.iter().map(|e| e.sequence).collect::<Vec<_>>();
		assert_eq!(seqs, vec![0, 1, 2]);
	}

	#[tokio::test]
	async fn complete_sets_output_once() {
		let journal = ops();

		let entry = JournalEntry::new(0, JournalEntryKind::SideEffect, "inc");
		journal.append("wf", &entry).await.unwrap();
		journal.complete("wf", 0, raw("5")).await.unwrap();

		let entries = journal.get_all("wf").await.unwrap();
		assert!(entries[0].completed);
		assert_eq!(entries[0].output.as_ref().unwrap().get(), "5");

		// Double completion is a logic error
		assert!(journal.complete("wf", 0, raw("6")).await.is_err());
	}

	#[tokio::test]
	async fn delete_all_clears_only_this_workflow() {
		let journal = ops();

		journal
			.append("wf", &JournalEntry::new(0, JournalEntryKind::Sleep, "sleep"))
			.await
			.unwrap();
		journal
			.append("wf2", &JournalEntry::new(0, JournalEntryKind::Sleep, "sleep"))
			.await
			.unwrap();

		journal.delete_all("wf").await.unwrap();
		assert!(journal.get_all("wf").await.unwrap().is_empty());
		assert_eq!(journal.get_all("wf2").await.unwrap().len(), 1);
	}
}
