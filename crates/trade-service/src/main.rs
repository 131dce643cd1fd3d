//! Entry point for the escrow trade coordinator.
//!
//! Loads configuration, builds the engine from the registered
//! implementations and runs it, optionally alongside the HTTP API.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use trade_config::Config;

mod apis;
mod factory_registry;
mod server;

/// Command-line arguments for the coordinator.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml", env = "TRADE_CONFIG")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started trade coordinator");

	let config_path = args
		.config
		.to_str()
		.ok_or("Configuration path is not valid UTF-8")?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.service.id);

	let engine = Arc::new(factory_registry::build_engine_from_config(config.clone()).await?);
	engine.initialize().await?;

	match config.api.filter(|api| api.enabled) {
		Some(api_config) => {
			let api_engine = Arc::clone(&engine);
			tokio::select! {
				result = engine.run() => {
					tracing::info!("Engine finished");
					result?;
				}
				result = server::start_server(api_config, api_engine) => {
					tracing::info!("API server finished");
					engine.shutdown().await?;
					result?;
				}
			}
		},
		None => {
			tracing::info!("Starting engine only");
			engine.run().await?;
		},
	}

	tracing::info!("Stopped trade coordinator");
	Ok(())
}
