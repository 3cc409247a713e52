use std::{net::SocketAddr, sync::Arc, sync::OnceLock, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
	Json, Router,
	extract::State,
	http::StatusCode,
	response::{IntoResponse, Response},
};
use tokio::{net::TcpListener, sync::Mutex, task::JoinHandle};

use crate::{
	proto::{Envelope, Payload},
	transport::{MessageHandler, Transport},
};

const GOSSIP_PATH: &str = "/internal/gossip";
const RPC_PATH: &str = "/internal/rpc";

type HandlerCell = Arc<OnceLock<MessageHandler>>;

/// Production transport: inbound envelopes arrive on internal axum routes,
/// outbound envelopes are POSTed with a pooled reqwest client. Gossip and
/// RPC ride separate paths so workflow traffic cannot head-of-line-block
/// failure detection.
pub struct HttpTransport {
	bind_addr: SocketAddr,
	client: reqwest::Client,
	handler: HandlerCell,
	server: Mutex<Option<JoinHandle<()>>>,
}

impl HttpTransport {
	pub fn new(bind_addr: SocketAddr) -> Result<Self> {
		let client = reqwest::Client::builder()
			.pool_idle_timeout(Duration::from_secs(60))
			.build()
			.context("failed to build http client")?;

		Ok(HttpTransport {
			bind_addr,
			client,
			handler: Arc::new(OnceLock::new()),
			server: Mutex::new(None),
		})
	}

	fn router(handler: HandlerCell) -> Router {
		Router::new()
			.route(GOSSIP_PATH, axum::routing::post(handle_envelope))
			.route(RPC_PATH, axum::routing::post(handle_envelope))
			.with_state(handler)
	}

	fn path_for(envelope: &Envelope) -> &'static str {
		match envelope.payload {
			Payload::Gossip(_) => GOSSIP_PATH,
			Payload::Rpc(_) | Payload::RpcReply(_) => RPC_PATH,
		}
	}

	async fn post(
		&self,
		addr: &str,
		envelope: &Envelope,
		timeout: Option<Duration>,
	) -> Result<Option<Envelope>> {
		let url = format!("http://{addr}{}", Self::path_for(envelope));

		let mut request = self.client.post(&url).json(envelope);
		if let Some(timeout) = timeout {
			request = request.timeout(timeout);
		}

		let response = request.send().await;
		let response = match response {
			Ok(response) => response,
			Err(err) if err.is_timeout() => return Ok(None),
			Err(err) => return Err(err).context("transport request failed"),
		};

		if response.status() == reqwest::StatusCode::NO_CONTENT {
			return Ok(None);
		}
		if !response.status().is_success() {
			anyhow::bail!("peer {addr} answered {}", response.status());
		}

		let reply = response
			.json::<Envelope>()
			.await
			.context("failed to decode reply envelope")?;
		Ok(Some(reply))
	}
}

#[async_trait]
impl Transport for HttpTransport {
	async fn start(&self) -> Result<()> {
		let router = Self::router(self.handler.clone());
		let listener = TcpListener::bind(self.bind_addr)
			.await
			.with_context(|| format!("failed to bind transport to {}", self.bind_addr))?;

		tracing::info!(addr=%self.bind_addr, "cluster transport listening");

		let handle = tokio::spawn(async move {
			if let Err(err) = axum::serve(listener, router).await {
				tracing::error!(?err, "cluster transport server stopped");
			}
		});

		*self.server.lock().await = Some(handle);
		Ok(())
	}

	async fn stop(&self) -> Result<()> {
		if let Some(handle) = self.server.lock().await.take() {
			handle.abort();
		}
		Ok(())
	}

	async fn send(&self, addr: &str, envelope: Envelope) -> Result<()> {
		// Fire-and-forget still bounds the attempt so a dead peer cannot pin
		// the task
		match self.post(addr, &envelope, Some(Duration::from_secs(5))).await {
			Ok(_) => Ok(()),
			Err(err) => {
				tracing::debug!(?err, %addr, "send failed");
				Ok(())
			}
		}
	}

	async fn send_and_receive(
		&self,
		addr: &str,
		envelope: Envelope,
		timeout: Duration,
	) -> Result<Option<Envelope>> {
		match self.post(addr, &envelope, Some(timeout)).await {
			Ok(reply) => Ok(reply),
			Err(err) => {
				// Connection refused and friends are indistinguishable from
				// a dead peer; surface them as a missed reply
				tracing::debug!(?err, %addr, "exchange failed");
				Ok(None)
			}
		}
	}

	fn set_handler(&self, handler: MessageHandler) {
		let _ = self.handler.set(handler);
	}

	fn local_addr(&self) -> String {
		self.bind_addr.to_string()
	}
}

async fn handle_envelope(
	State(handler): State<HandlerCell>,
	Json(envelope): Json<Envelope>,
) -> Response {
	let Some(handler) = handler.get().cloned() else {
		return (StatusCode::SERVICE_UNAVAILABLE, "transport not started").into_response();
	};

	match handler(envelope).await {
		Ok(Some(reply)) => Json(reply).into_response(),
		Ok(None) => StatusCode::NO_CONTENT.into_response(),
		Err(err) => {
			tracing::warn!(?err, "message handler failed");
			(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
		}
	}
}
