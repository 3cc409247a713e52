#[derive(thiserror::Error, Debug)]
pub enum ClusterError {
	/// The owning node did not answer in time or refused the envelope.
	/// Workflow state is untouched; the caller may retry.
	#[error("node {0} unavailable")]
	Unavailable(String),

	#[error("rpc to {0} timed out")]
	RpcTimeout(String),

	#[error("hash ring is empty")]
	RingEmpty,

	#[error("no address known for node {0}")]
	UnknownNode(String),

	#[error("transport is not running")]
	TransportStopped,

	#[error("unexpected rpc response: {0}")]
	UnexpectedResponse(String),
}
