use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Lifecycle of a workflow instance. Terminal states never transition
/// further.
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	Hash,
	Serialize,
	Deserialize,
	strum::AsRefStr,
	strum::EnumString,
	strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkflowStatus {
	Pending,
	Running,
	Suspended,
	Completed,
	Failed,
	Cancelled,
}

impl WorkflowStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
		)
	}
}

/// One record per workflow instance, keyed by workflow id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetadata {
	pub workflow_id: String,
	pub workflow_type: String,
	pub status: WorkflowStatus,
	/// Node currently executing the workflow.
	pub owner_id: Option<String>,
	pub input: Box<RawValue>,
	/// Set iff the workflow completed.
	pub output: Option<Box<RawValue>>,
	/// Set iff the workflow failed.
	pub error_message: Option<String>,
	pub create_ts: i64,
	pub update_ts: i64,
	/// Execution lease; an expired lease on a Running workflow means the
	/// owner crashed and recovery may reclaim it.
	pub locked_until: Option<i64>,
	/// Set iff the workflow is suspended with a deadline.
	pub suspended_until: Option<i64>,
	pub retry_count: u32,
	pub max_retries: u32,
}

#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JournalEntryKind {
	Call,
	SideEffect,
	Sleep,
	Signal,
	State,
	/// Reserved by the journal format for externally-resolved promises.
	Awakeable,
}

/// One journaled operation. Entries for a workflow are dense in sequence
/// (0, 1, 2, ...) and are appended before their effect is performed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
	pub sequence: u64,
	pub kind: JournalEntryKind,
	pub name: String,
	pub input: Option<Box<RawValue>>,
	pub output: Option<Box<RawValue>>,
	pub create_ts: i64,
	pub completed: bool,
}

impl JournalEntry {
	pub fn new(sequence: u64, kind: JournalEntryKind, name: impl Into<String>) -> Self {
		JournalEntry {
			sequence,
			kind,
			name: name.into(),
			input: None,
			output: None,
			create_ts: flywheel_util::timestamp::now(),
			completed: false,
		}
	}

	pub fn with_input(mut self, input: Box<RawValue>) -> Self {
		self.input = Some(input);
		self
	}

	/// Fire-and-forget control records (state writes, delivered signals) are
	/// journaled already completed.
	pub fn completed(mut self) -> Self {
		self.completed = true;
		self
	}
}

/// Persisted wake-up for a sleeping workflow. Exactly one row exists per
/// not-yet-completed sleep entry; deleting the row is the signal that the
/// timer has fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurableTimer {
	pub timer_id: String,
	pub workflow_id: String,
	pub wake_ts: i64,
	/// Sequence of the sleep entry that scheduled this timer.
	pub sequence: u64,
}
