#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
	#[error("unknown function: {0}")]
	UnknownFunction(String),

	#[error("unknown workflow: {0}")]
	UnknownWorkflow(String),

	#[error("workflow {0} already exists")]
	WorkflowAlreadyExists(String),

	#[error("workflow {0} not found")]
	WorkflowNotFound(String),

	#[error("invalid request: {0}")]
	InvalidRequest(String),

	#[error("call {0} failed: {1}")]
	CallFailed(String, anyhow::Error),

	#[error("workflow {0} is not waiting for signal {1}")]
	NotWaitingForSignal(String, String),

	#[error("workflow {0} was cancelled")]
	Cancelled(String),

	#[error("history diverged at sequence {0}: {1}")]
	HistoryDiverged(u64, String),

	#[error("max in-flight workflows reached")]
	Saturated,

	// Control signals, not failures. Caught by the executor to drive
	// suspension bookkeeping; user code must let them propagate.
	#[error("workflow sleeping until {0}")]
	Sleep(i64),

	#[error("workflow waiting for signal {0}")]
	SignalWait(String),
}

impl WorkflowError {
	/// Whether this error suspends the workflow instead of failing it.
	pub fn is_suspend(&self) -> bool {
		matches!(self, WorkflowError::Sleep(_) | WorkflowError::SignalWait(_))
	}

	/// Finds a `WorkflowError` anywhere in an anyhow chain.
	pub fn from_chain(err: &anyhow::Error) -> Option<&WorkflowError> {
		err.chain().find_map(|x| x.downcast_ref::<WorkflowError>())
	}
}
