//! Escrow event watching.
//!
//! Backends observe escrow contracts and forward state changes they see on
//! chain. The engine feeds these into reconciliation so the mirror converges
//! on the chain even when a coordinator write was lost.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use trade_types::{ConfigSchema, EscrowEvent, ImplementationRegistry, NetworksConfig};

pub mod implementations {
	pub mod onchain {
		pub mod escrow;
	}
}

#[derive(Debug, Error)]
pub enum WatchError {
	#[error("Connection error: {0}")]
	Connection(String),
	#[error("Already watching")]
	AlreadyWatching,
	#[error("Parse error: {0}")]
	ParseError(String),
	#[error("Validation error: {0}")]
	ValidationError(String),
}

#[async_trait]
pub trait WatchInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Starts forwarding escrow events into `sender` until stopped.
	async fn start_watching(
		&self,
		sender: mpsc::UnboundedSender<EscrowEvent>,
	) -> Result<(), WatchError>;

	async fn stop_watching(&self) -> Result<(), WatchError>;
}

pub type WatchFactory =
	fn(&toml::Value, &NetworksConfig) -> Result<Box<dyn WatchInterface>, WatchError>;

pub trait WatchRegistry: ImplementationRegistry<Factory = WatchFactory> {}

pub fn get_all_implementations() -> Vec<(&'static str, WatchFactory)> {
	use implementations::onchain;

	vec![(
		onchain::escrow::Registry::NAME,
		onchain::escrow::Registry::factory(),
	)]
}

/// Runs every configured watcher.
pub struct WatchService {
	implementations: Vec<Box<dyn WatchInterface>>,
}

impl WatchService {
	pub fn new(implementations: Vec<Box<dyn WatchInterface>>) -> Self {
		Self { implementations }
	}

	pub fn is_empty(&self) -> bool {
		self.implementations.is_empty()
	}

	pub async fn start_all(
		&self,
		sender: mpsc::UnboundedSender<EscrowEvent>,
	) -> Result<(), WatchError> {
		for implementation in &self.implementations {
			implementation.start_watching(sender.clone()).await?;
		}
		Ok(())
	}

	/// Stops every watcher; the first failure is returned after all were tried.
	pub async fn stop_all(&self) -> Result<(), WatchError> {
		let mut first_error = None;
		for implementation in &self.implementations {
			if let Err(e) = implementation.stop_watching().await {
				tracing::warn!(error = %e, "Failed to stop watcher");
				first_error.get_or_insert(e);
			}
		}
		first_error.map_or(Ok(()), Err)
	}
}
