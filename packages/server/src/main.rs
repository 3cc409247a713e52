use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use flywheel_config::NodeConfig;
use flywheel_runtime::Registry;
use flywheel_server::Server;

#[derive(Parser)]
#[command(name = "flywheel", version, about = "Durable workflow engine node")]
struct Cli {
	/// Path to the JSON config file
	#[clap(long)]
	config: Option<PathBuf>,
}

fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "info".into()),
		)
		.init();

	let cli = Cli::parse();
	let config = NodeConfig::load(cli.config.as_deref())?;
	tracing::info!(?config, "loaded config");

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()?
		.block_on(Server::new(config, Registry::new()).run())
}
