use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::sync::watch;

use flywheel_api::{ApiCtx, RuntimeExecutor};
use flywheel_cluster::{ClusterNode, HttpTransport};
use flywheel_config::NodeConfig;
use flywheel_kv::{Kv, KvDriver, MemoryKvDriver, RocksDbKvDriver};
use flywheel_runtime::{
	RecoveryProcessor, Registry, Runtime, RuntimeConfig, TimerProcessor,
};
use flywheel_storage::Storage;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:7400";
const DEFAULT_API_ADDR: &str = "0.0.0.0:7410";

/// One flywheel node: durable runtime, background processors, cluster
/// membership, and the service API. Embedders construct it with their own
/// registry; the stock binary starts with an empty one.
pub struct Server {
	config: NodeConfig,
	registry: Registry,
}

impl Server {
	pub fn new(config: NodeConfig, registry: Registry) -> Self {
		Server { config, registry }
	}

	pub async fn run(self) -> Result<()> {
		let node_id = self.config.resolve_node_id();
		tracing::info!(%node_id, "starting node");

		// Storage
		let driver: Arc<dyn KvDriver> = match &self.config.storage_path {
			Some(path) => Arc::new(RocksDbKvDriver::open(path.clone())?),
			None => {
				tracing::warn!("no storage_path configured, workflow state is in-memory only");
				Arc::new(MemoryKvDriver::new())
			}
		};
		let storage = Storage::new(Kv::new(driver));

		// Runtime
		let registry = self.registry.handle();
		if registry.size() == 0 {
			tracing::warn!("registry is empty, this node will reject every submit");
		}
		let runtime = Runtime::new(
			node_id.clone(),
			storage.clone(),
			registry,
			RuntimeConfig {
				max_concurrent_workflows: self.config.max_concurrent_workflows(),
				..Default::default()
			},
		);

		// Cluster
		let bind_addr = self
			.config
			.bind_addr
			.unwrap_or_else(|| default_addr(DEFAULT_BIND_ADDR));
		let transport = Arc::new(HttpTransport::new(bind_addr)?);
		let cluster = ClusterNode::new(
			node_id.clone(),
			self.config.clone(),
			transport,
			Arc::new(RuntimeExecutor::new(runtime.clone())),
		);

		let (shutdown_tx, shutdown_rx) = watch::channel(());

		let mut handles = cluster.start(shutdown_rx.clone()).await?;
		handles.push(
			TimerProcessor::new(runtime.clone(), self.config.timer_poll_interval())
				.start(shutdown_rx.clone()),
		);
		handles.push(
			RecoveryProcessor::new(runtime.clone(), self.config.recovery_poll_interval())
				.start(shutdown_rx.clone()),
		);

		// Service API
		let api_addr = self
			.config
			.api_addr
			.unwrap_or_else(|| default_addr(DEFAULT_API_ADDR));
		let router = flywheel_api::router(ApiCtx::new(cluster.clone(), runtime));
		let listener = tokio::net::TcpListener::bind(api_addr)
			.await
			.with_context(|| format!("failed to bind api to {api_addr}"))?;
		tracing::info!(addr=%api_addr, "service api listening");

		let mut api_shutdown = shutdown_rx.clone();
		let api_handle = tokio::spawn(async move {
			let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
				let _ = api_shutdown.changed().await;
			});
			if let Err(err) = serve.await {
				tracing::error!(?err, "service api stopped");
			}
		});

		// Run until asked to stop
		shutdown_signal().await;
		tracing::info!("shutting down");

		let _ = shutdown_tx.send(());
		cluster.stop().await?;
		let _ = api_handle.await;
		for handle in handles {
			let _ = handle.await;
		}
		storage.close().await?;

		tracing::info!("node stopped");
		Ok(())
	}
}

fn default_addr(raw: &str) -> SocketAddr {
	raw.parse().expect("default address must parse")
}

async fn shutdown_signal() {
	let ctrl_c = tokio::signal::ctrl_c();

	#[cfg(unix)]
	{
		let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler");
		tokio::select! {
			_ = ctrl_c => {}
			_ = term.recv() => {}
		}
	}

	#[cfg(not(unix))]
	{
		let _ = ctrl_c.await;
	}
}
