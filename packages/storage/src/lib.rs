pub mod journal;
pub mod keys;
pub mod state;
pub mod timer;
pub mod types;
pub mod workflow;

use anyhow::Result;
use flywheel_kv::{Kv, WriteOp};

pub use crate::{
	journal::JournalOps,
	state::StateOps,
	timer::TimerOps,
	types::{DurableTimer, JournalEntry, JournalEntryKind, WorkflowMetadata, WorkflowStatus},
	workflow::WorkflowOps,
};

/// Typed facade over the shared key space. Cheap to clone; all surfaces
/// share one KV handle.
#[derive(Clone)]
pub struct Storage {
	kv: Kv,
	pub journal: JournalOps,
	pub state: StateOps,
	pub workflows: WorkflowOps,
	pub timers: TimerOps,
}

impl Storage {
	pub fn new(kv: Kv) -> Self {
		Storage {
			journal: JournalOps::new(kv.clone()),
			state: StateOps::new(kv.clone()),
			workflows: WorkflowOps::new(kv.clone()),
			timers: TimerOps::new(kv.clone()),
			kv,
		}
	}

	/// Journals a state mutation and applies it in one atomic batch.
	pub async fn record_state_write(
		&self,
		workflow_id: &str,
		entry: &JournalEntry,
		state_key: &str,
		value: &[u8],
	) -> Result<()> {
		self.kv
			.batch(vec![
				WriteOp::Put {
					key: keys::JournalKey::new(workflow_id, entry.sequence).pack(),
					value: serde_json::to_vec(entry)?,
				},
				WriteOp::Put {
					key: keys::StateKey::new(workflow_id, state_key).pack(),
					value: value.to_vec(),
				},
			])
			.await
	}

	/// Journals a sleep and schedules its timer row in one atomic batch, so
	/// a crash cannot leave a sleep without a wake-up or vice versa.
	pub async fn record_sleep(
		&self,
		workflow_id: &str,
		entry: &JournalEntry,
		timer: &DurableTimer,
	) -> Result<()> {
		self.kv
			.batch(vec![
				WriteOp::Put {
					key: keys::JournalKey::new(workflow_id, entry.sequence).pack(),
					value: serde_json::to_vec(entry)?,
				},
				WriteOp::Put {
					key: keys::TimerKey::new(timer.wake_ts, &timer.timer_id).pack(),
					value: serde_json::to_vec(timer)?,
				},
			])
			.await
	}

	pub async fn close(&self) -> Result<()> {
		self.kv.close().await
	}
}
