use std::time::Duration;

use anyhow::Result;
use tokio::{sync::watch, task::JoinHandle};
use tracing::Instrument;

use crate::runtime::Runtime;

const DEFAULT_BATCH_SIZE: usize = 128;

/// Polls the timer key space and wakes workflows whose wake time has passed.
/// The timer row is deleted before the resume so each row fires at most
/// once.
pub struct TimerProcessor {
	runtime: Runtime,
	poll_interval: Duration,
	batch_size: usize,
}

impl TimerProcessor {
	pub fn new(runtime: Runtime, poll_interval: Duration) -> Self {
		TimerProcessor {
			runtime,
			poll_interval,
			batch_size: DEFAULT_BATCH_SIZE,
		}
	}

	pub fn start(self, mut shutdown_rx: watch::Receiver<()>) -> JoinHandle<()> {
		tokio::spawn(
			async move {
				let mut interval = tokio::time::interval(self.poll_interval);
				interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

				loop {
					tokio::select! {
						_ = interval.tick() => {}
						_ = shutdown_rx.changed() => break,
					}

					if let Err(err) = self.tick().await {
						tracing::error!(?err, "timer tick failed");
					}
				}

				tracing::debug!("timer processor stopped");
			}
			.instrument(tracing::info_span!("timer_processor")),
		)
	}

	async fn tick(&self) -> Result<()> {
		let now = flywheel_util::timestamp::now();
		let ready = self
			.runtime
			.storage()
			.timers
			.find_ready(now, self.batch_size)
			.await?;

		for timer in ready {
			// Delete before resume; a wake lost to a crash here is repaired
			// by the recovery processor
			if let Err(err) = self
				.runtime
				.storage()
				.timers
				.delete(timer.wake_ts, &timer.timer_id)
				.await
			{
				tracing::error!(?err, timer_id=%timer.timer_id, "failed deleting timer");
				continue;
			}

			tracing::debug!(workflow_id=%timer.workflow_id, wake_ts=%timer.wake_ts, "timer fired");

			// One bad workflow must not stop the batch
			if let Err(err) = self.runtime.resume(&timer.workflow_id).await {
				tracing::error!(?err, workflow_id=%timer.workflow_id, "timer resume failed");
			}
		}

		Ok(())
	}
}
