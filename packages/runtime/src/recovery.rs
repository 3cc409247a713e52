use std::time::Duration;

use anyhow::Result;
use tokio::{sync::watch, task::JoinHandle};
use tracing::Instrument;

use flywheel_storage::WorkflowStatus;

use crate::runtime::Runtime;

const DEFAULT_BATCH_SIZE: usize = 64;

/// Safety net behind the timer processor. Re-drives workflows that are
/// Pending but never ran, Suspended past their deadline, or Running with an
/// expired execution lease (owner crashed). Resumes are idempotent because
/// replay returns the same outputs.
pub struct RecoveryProcessor {
	runtime: Runtime,
	poll_interval: Duration,
	batch_size: usize,
}

impl RecoveryProcessor {
	pub fn new(runtime: Runtime, poll_interval: Duration) -> Self {
		RecoveryProcessor {
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
						tracing::error!(?err, "recovery tick failed");
					}
				}

				tracing::debug!("recovery processor stopped");
			}
			.instrument(tracing::info_span!("recovery_processor")),
		)
	}

	async fn tick(&self) -> Result<()> {
		let now = flywheel_util::timestamp::now();
		let storage = self.runtime.storage();
		let grace = self.runtime.config().lease_duration.as_millis() as i64;

		// Created but never ran (crash between create and first execute).
		// The grace period keeps us from racing a submit in progress.
		let pending = storage
			.workflows
			.find_by_status(WorkflowStatus::Pending, self.batch_size)
			.await?;
		for metadata in pending {
			if now - metadata.update_ts < grace {
				continue;
			}
			tracing::info!(workflow_id=%metadata.workflow_id, "recovering pending workflow");
			self.resume(&metadata.workflow_id).await;
		}

		// Suspended with an elapsed deadline (timer row lost or wake missed)
		let ready = storage
			.workflows
			.find_suspended_ready(now, self.batch_size)
			.await?;
		for metadata in ready {
			tracing::debug!(workflow_id=%metadata.workflow_id, "recovering suspended workflow");
			self.resume(&metadata.workflow_id).await;
		}

		// Running with an expired lease: the owner died mid-execution
		let running = storage
			.workflows
			.find_by_status(WorkflowStatus::Running, self.batch_size)
			.await?;
		for mut metadata in running {
			let expired = metadata
				.locked_until
				.map(|deadline| deadline < now)
				.unwrap_or(false);
			if !expired {
				continue;
			}

			metadata.retry_count += 1;
			if metadata.retry_count > metadata.max_retries {
				tracing::warn!(
					workflow_id=%metadata.workflow_id,
					retry_count=%metadata.retry_count,
					"workflow exceeded max retries, failing"
				);
				metadata.status = WorkflowStatus::Failed;
				metadata.error_message =
					Some("execution lease expired and max retries exceeded".to_string());
				metadata.owner_id = None;
				metadata.locked_until = None;
				storage.workflows.update(&metadata).await?;
				continue;
			}

			tracing::info!(
				workflow_id=%metadata.workflow_id,
				retry_count=%metadata.retry_count,
				"reclaiming workflow with expired lease"
			);
			storage.workflows.update(&metadata).await?;
			self.resume(&metadata.workflow_id).await;
		}

		Ok(())
	}

	async fn resume(&self, workflow_id: &str) {
		if let Err(err) = self.runtime.resume(workflow_id).await {
			tracing::error!(?err, %workflow_id, "recovery resume failed");
		}
	}
}
