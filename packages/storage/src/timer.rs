use anyhow::Result;
use flywheel_kv::{Kv, WriteOp};

use crate::{keys::TimerKey, types::DurableTimer};

/// Durable timers, keyed `(wake_ts, timer_id)` so a range scan up to now
/// yields every due timer in wake order.
#[derive(Clone)]
pub struct TimerOps {
	kv: Kv,
}

impl TimerOps {
	pub(crate) fn new(kv: Kv) -> Self {
		TimerOps { kv }
	}

	pub async fn schedule(&self, timer: &DurableTimer) -> Result<()> {
		let key = TimerKey::new(timer.wake_ts, &timer.timer_id).pack();
		self.kv.put(&key, &serde_json::to_vec(timer)?).await
	}

	/// Timers whose wake time has passed, in wake order.
	pub async fn find_ready(&self, now: i64, limit: usize) -> Result<Vec<DurableTimer>> {
		let entries = self
			.kv
			.scan_range(
				&TimerKey::entire_subspace(),
				&TimerKey::ready_range_end(now),
				Some(limit),
			)
			.await?;

		entries
			.into_iter()
			.map(|e| serde_json::from_slice::<DurableTimer>(&e.value).map_err(Into::into))
			.collect()
	}

	pub async fn delete(&self, wake_ts: i64, timer_id: &str) -> Result<()> {
		self.kv.delete(&TimerKey::new(wake_ts, timer_id).pack()).await
	}

	/// Drops every timer belonging to a workflow (cancellation path).
	pub async fn delete_for_workflow(&self, workflow_id: &str) -> Result<()> {
		let entries = self.kv.scan(&TimerKey::entire_subspace(), None).await?;

		let mut ops = Vec::new();
		for entry in entries {
			let timer = serde_json::from_slice::<DurableTimer>(&entry.value)?;
			if timer.workflow_id == workflow_id {
				ops.push(WriteOp::Delete { key: entry.key });
			}
		}

		if ops.is_empty() {
			return Ok(());
		}
		self.kv.batch(ops).await
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use flywheel_kv::MemoryKvDriver;

	use super::*;

	fn ops() -> TimerOps {
		TimerOps::new(Kv::new(Arc::new(MemoryKvDriver::new())))
	}

	fn timer(id: &str, workflow_id: &str, wake_ts: i64) -> DurableTimer {
		DurableTimer {
			timer_id: id.to_string(),
			workflow_id: workflow_id.to_string(),
			wake_ts,
			sequence: 0,
		}
	}

	#[tokio::test]
	async fn find_ready_returns_due_timers_in_wake_order() {
		let timers = ops();

		timers.schedule(&timer("t3", "wf3", 3000)).await.unwrap();
		timers.schedule(&timer("t1", "wf1", 1000)).await.unwrap();
		timers.schedule(&timer("t2", "wf2", 2000)).await.unwrap();

		let ready = timers.find_ready(2000, 10).await.unwrap();
		let ids = ready.iter().map(|t| t.timer_id.as_str()).collect::<Vec<_>>();
		assert_eq!(ids, vec!["t1", "t2"]);
	}

	#[tokio::test]
	async fn deleted_timer_never_fires_again() {
		let timers = ops();

		timers.schedule(&timer("t1", "wf1", 1000)).await.unwrap();
		timers.delete(1000, "t1").await.unwrap();

		assert!(timers.find_ready(5000, 10).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn delete_for_workflow_leaves_others() {
		let timers = ops();

		timers.schedule(&timer("t1", "wf1", 1000)).await.unwrap();
		timers.schedule(&timer("t2", "wf1", 2000)).await.unwrap();
		timers.schedule(&timer("t3", "wf2", 3000)).await.unwrap();

		timers.delete_for_workflow("wf1").await.unwrap();

		let remaining = timers.find_ready(i64::MAX - 1, 10).await.unwrap();
		assert_eq!(remaining.len(), 1);
		assert_eq!(remaining[0].timer_id, "t3");
	}
}
