use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::value::RawValue;

use flywheel_storage::{DurableTimer, JournalEntry, JournalEntryKind, Storage};

use crate::{error::WorkflowError, registry::RegistryHandle, retry::RetryPolicy};

/// The object threaded through a workflow handler. Every operation consumes
/// the next sequence number and either replays the journaled outcome or
/// performs the real action and journals it.
pub struct WorkflowCtx {
	workflow_id: String,
	workflow_name: String,
	storage: Storage,
	registry: RegistryHandle,
	/// Journal loaded at execution start, dense in sequence from 0.
	entries: Vec<JournalEntry>,
	/// Always starts at 0: a resumed handler re-runs from the top and walks
	/// the whole journal.
	cursor: usize,
}

impl WorkflowCtx {
	pub(crate) fn new(
		workflow_id: String,
		workflow_name: String,
		storage: Storage,
		registry: RegistryHandle,
		entries: Vec<JournalEntry>,
	) -> Self {
		WorkflowCtx {
			workflow_id,
			workflow_name,
			storage,
			registry,
			entries,
			cursor: 0,
		}
	}

	pub fn workflow_id(&self) -> &str {
		&self.workflow_id
	}

	pub fn workflow_name(&self) -> &str {
		&self.workflow_name
	}

	/// Claims the next sequence number and the journaled entry for it, if
	/// one exists.
	fn next_step(&mut self) -> (u64, Option<JournalEntry>) {
		let seq = self.cursor as u64;
		self.cursor += 1;
		(seq, self.entries.get(seq as usize).cloned())
	}

	fn check_entry(
		&self,
		entry: &JournalEntry,
		kind: JournalEntryKind,
		name: &str,
	) -> Result<()> {
		if entry.kind != kind || entry.name != name {
			return Err(WorkflowError::HistoryDiverged(
				entry.sequence,
				format!(
					"expected {kind} `{name}`, journal has {} `{}`",
					entry.kind, entry.name
				),
			)
			.into());
		}
		Ok(())
	}

	fn parse_output<T: DeserializeOwned>(&self, entry: &JournalEntry) -> Result<T> {
		let output = entry
			.output
			.as_ref()
			.with_context(|| format!("completed entry {} has no output", entry.sequence))?;
		serde_json::from_str(output.get()).map_err(Into::into)
	}

	/// Invokes a registered function with retries. The request is journaled
	/// before the first attempt; the response is journaled on success. On
	/// replay of a completed entry the function is not invoked.
	#[tracing::instrument(skip_all, fields(workflow_id=%self.workflow_id, function=%name))]
	pub async fn call<Req, Res>(
		&mut self,
		name: &str,
		req: &Req,
		policy: RetryPolicy,
	) -> Result<Res>
	where
		Req: Serialize,
		Res: DeserializeOwned,
	{
		let (seq, replayed) = self.next_step();

		if let Some(entry) = &replayed {
			self.check_entry(entry, JournalEntryKind::Call, name)?;
			if entry.completed {
				tracing::debug!(%seq, "replaying call");
				return self.parse_output(entry);
			}
			// Crashed mid-call: the row exists but carries no output.
			// Re-invoke against the same sequence.
		}

		let function = self.registry.get_function(name)?;
		let input = serde_json::value::to_raw_value(req)?;

		if replayed.is_none() {
			let entry =
				JournalEntry::new(seq, JournalEntryKind::Call, name).with_input(input.clone());
			self.storage.journal.append(&self.workflow_id, &entry).await?;
		}

		let mut attempt = 0u32;
		let output = loop {
			match function(input.clone()).await {
				Ok(output) => break output,
				Err(err) => {
					attempt += 1;
					if attempt >= policy.max_attempts || !policy.should_retry(&err) {
						return Err(WorkflowError::CallFailed(name.to_string(), err).into());
					}

					let delay = policy.delay_for(attempt as usize - 1);
					tracing::debug!(%attempt, ?delay, "call failed, backing off");
					tokio::time::sleep(delay).await;
				}
			}
		};

		self.storage
			.journal
			.complete(&self.workflow_id, seq, output.clone())
			.await?;

		serde_json::from_str(output.get()).map_err(Into::into)
	}

	/// Runs a block exactly once across the workflow's lifetime. On replay
	/// of a completed entry the block is not re-run and the cached result is
	/// returned.
	#[tracing::instrument(skip_all, fields(workflow_id=%self.workflow_id, effect=%name))]
	pub async fn side_effect<T, F, Fut>(&mut self, name: &str, effect: F) -> Result<T>
	where
		T: Serialize + DeserializeOwned,
		F: FnOnce() -> Fut,
		Fut: std::future::Future<Output = Result<T>>,
	{
		let (seq, replayed) = self.next_step();

		if let Some(entry) = &replayed {
			self.check_entry(entry, JournalEntryKind::SideEffect, name)?;
			if entry.completed {
				tracing::debug!(%seq, "replaying side effect");
				return self.parse_output(entry);
			}
		}

		if replayed.is_none() {
			let entry = JournalEntry::new(seq, JournalEntryKind::SideEffect, name);
			self.storage.journal.append(&self.workflow_id, &entry).await?;
		}

		let value = effect().await?;

		self.storage
			.journal
			.complete(
				&self.workflow_id,
				seq,
				serde_json::value::to_raw_value(&value)?,
			)
			.await?;

		Ok(value)
	}

	/// Suspends the workflow for at least `duration`. First execution
	/// schedules a durable timer and unwinds; replay either continues past a
	/// completed sleep or re-suspends until the stored wake time.
	#[tracing::instrument(skip_all, fields(workflow_id=%self.workflow_id, ?duration))]
	pub async fn sleep(&mut self, duration: Duration) -> Result<()> {
		let (seq, replayed) = self.next_step();
		let now = flywheel_util::timestamp::now();

		if let Some(entry) = &replayed {
			self.check_entry(entry, JournalEntryKind::Sleep, "sleep")?;
			if entry.completed {
				return Ok(());
			}

			let wake_ts = entry
				.input
				.as_ref()
				.context("sleep entry missing wake time")
				.and_then(|raw| serde_json::from_str::<i64>(raw.get()).map_err(Into::into))?;

			if now >= wake_ts {
				self.storage
					.journal
					.complete(
						&self.workflow_id,
						seq,
						serde_json::value::to_raw_value(&wake_ts)?,
					)
					.await?;
				// The row may still exist if the wake came from recovery
				// rather than the timer processor
				self.storage
					.timers
					.delete(wake_ts, &format!("{}:{seq}", self.workflow_id))
					.await?;
				return Ok(());
			}

			return Err(WorkflowError::Sleep(wake_ts).into());
		}

		let wake_ts = now + duration.as_millis() as i64;
		let entry = JournalEntry::new(seq, JournalEntryKind::Sleep, "sleep")
			.with_input(serde_json::value::to_raw_value(&wake_ts)?);
		let timer = DurableTimer {
			timer_id: format!("{}:{seq}", self.workflow_id),
			workflow_id: self.workflow_id.clone(),
			wake_ts,
			sequence: seq,
		};

		self.storage
			.record_sleep(&self.workflow_id, &entry, &timer)
			.await?;

		tracing::debug!(%wake_ts, "workflow sleeping");
		Err(WorkflowError::Sleep(wake_ts).into())
	}

	/// Suspends until an external signal with this name is delivered. The
	/// delivered payload becomes the journaled output.
	#[tracing::instrument(skip_all, fields(workflow_id=%self.workflow_id, signal=%name))]
	pub async fn await_signal<T: DeserializeOwned>(&mut self, name: &str) -> Result<T> {
		let (seq, replayed) = self.next_step();

		if let Some(entry) = &replayed {
			self.check_entry(entry, JournalEntryKind::Signal, name)?;
			if entry.completed {
				tracing::debug!(%seq, "replaying signal");
				return self.parse_output(entry);
			}
			return Err(WorkflowError::SignalWait(name.to_string()).into());
		}

		let entry = JournalEntry::new(seq, JournalEntryKind::Signal, name);
		self.storage.journal.append(&self.workflow_id, &entry).await?;

		tracing::debug!("workflow waiting for signal");
		Err(WorkflowError::SignalWait(name.to_string()).into())
	}

	/// Writes keyed state. The mutation is journaled in the same batch as
	/// the write; on replay the write is skipped.
	pub async fn set_state<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
		let (seq, replayed) = self.next_step();

		if let Some(entry) = &replayed {
			self.check_entry(entry, JournalEntryKind::State, key)?;
			return Ok(());
		}

		let raw = serde_json::value::to_raw_value(value)?;
		let entry = JournalEntry::new(seq, JournalEntryKind::State, key)
			.with_input(raw.clone())
			.completed();

		self.storage
			.record_state_write(&self.workflow_id, &entry, key, raw.get().as_bytes())
			.await
	}

	/// Reads keyed state directly. Not journaled: state is a pure function
	/// of the journal prefix, so replay observes the same values.
	pub async fn get_state<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
		let raw = self.storage.state.get(&self.workflow_id, key).await?;
		match raw {
			Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
			None => Ok(None),
		}
	}

	/// Deletes keyed state. Not journaled.
	pub async fn clear_state(&self, key: &str) -> Result<()> {
		self.storage.state.delete(&self.workflow_id, key).await
	}

	/// A random value that is stable across replays.
	pub async fn random(&mut self) -> Result<f64> {
		self.side_effect("random", || async { Ok(rand::random::<f64>()) })
			.await
	}

	/// A uuid that is stable across replays.
	pub async fn uuid(&mut self) -> Result<String> {
		self.side_effect("uuid", || async { Ok(uuid::Uuid::new_v4().to_string()) })
			.await
	}
}
