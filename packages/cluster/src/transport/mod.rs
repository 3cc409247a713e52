pub mod http;
pub mod memory;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::proto::Envelope;

/// Inbound message callback. Returning `Some` sends a reply back on the
/// same exchange (HTTP response body, or directly in memory).
pub type MessageHandler =
	Arc<dyn Fn(Envelope) -> BoxFuture<'static, Result<Option<Envelope>>> + Send + Sync>;

/// Best-effort delivery of framed envelopes between nodes. The transport
/// never retries; retry policy belongs to callers.
#[async_trait]
pub trait Transport: Send + Sync {
	async fn start(&self) -> Result<()>;

	async fn stop(&self) -> Result<()>;

	/// Fire-and-forget send.
	async fn send(&self, addr: &str, envelope: Envelope) -> Result<()>;

	/// Request/response exchange. Returns `Ok(None)` on timeout, never
	/// blocks past it.
	async fn send_and_receive(
		&self,
		addr: &str,
		envelope: Envelope,
		timeout: Duration,
	) -> Result<Option<Envelope>>;

	/// Must be called before `start`.
	fn set_handler(&self, handler: MessageHandler);

	/// The address peers can reach this transport at.
	fn local_addr(&self) -> String;
}
