//! Polls escrow contracts for lifecycle events.

use crate::{WatchError, WatchFactory, WatchInterface, WatchRegistry};
use alloy_primitives::{Address, Log as PrimLog, LogData};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_types::{Filter, Log};
use alloy_sol_types::{sol, SolEvent};
use alloy_transport_http::Http;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use trade_types::{
	current_timestamp, truncate_id, ConfigSchema, EscrowEvent, EscrowEventKind, Field, FieldType,
	ImplementationRegistry, NetworksConfig, Schema, TransactionHash, ValidationError,
};

sol! {
	event CancelRequested(uint256 indexed orderId, address indexed requester);
	event PaymentMarkedSent(uint256 indexed orderId);
	event PaymentReleased(uint256 indexed orderId);
	event OrderCancelled(uint256 indexed orderId);
}

const DEFAULT_POLLING_INTERVAL_SECS: u64 = 5;

#[derive(Clone)]
struct WatchedChain {
	chain_id: u64,
	provider: RootProvider<Http<reqwest::Client>>,
	escrow: Address,
}

/// Watches the escrow contract of every configured chain.
pub struct EscrowWatcher {
	chains: Vec<WatchedChain>,
	start_block: Option<u64>,
	polling_interval: Duration,
	is_watching: Arc<AtomicBool>,
	stop_signals: Mutex<Vec<mpsc::Sender<()>>>,
}

impl EscrowWatcher {
	pub fn new(
		network_ids: &[u64],
		networks: &NetworksConfig,
		start_block: Option<u64>,
		polling_interval: Duration,
	) -> Result<Self, WatchError> {
		let mut chains = Vec::new();
		for &chain_id in network_ids {
			let network = networks.get(&chain_id).ok_or_else(|| {
				WatchError::ValidationError(format!(
					"Chain ID {} not found in networks configuration",
					chain_id
				))
			})?;
			let Some(escrow) = network.deployed_escrow() else {
				tracing::warn!(chain_id, "No escrow deployed, not watching");
				continue;
			};
			let escrow: Address = escrow.parse().map_err(|e| {
				WatchError::ValidationError(format!("Invalid escrow address on {}: {}", chain_id, e))
			})?;
			let url = network
				.rpc_url
				.parse()
				.map_err(|e| WatchError::Connection(format!("Invalid RPC URL: {}", e)))?;
			chains.push(WatchedChain {
				chain_id,
				provider: RootProvider::new_http(url),
				escrow,
			});
		}

		Ok(Self {
			chains,
			start_block,
			polling_interval,
			is_watching: Arc::new(AtomicBool::new(false)),
			stop_signals: Mutex::new(Vec::new()),
		})
	}

	/// Decodes an escrow log; `None` for events this watcher does not track.
	fn parse_escrow_log(chain_id: u64, log: &Log) -> Result<Option<EscrowEvent>, WatchError> {
		let Some(topic0) = log.topics().first().copied() else {
			return Ok(None);
		};
		let prim_log = PrimLog {
			address: log.address(),
			data: LogData::new_unchecked(log.topics().to_vec(), log.data().data.clone()),
		};
		let decode_err =
			|e: alloy_sol_types::Error| WatchError::ParseError(format!("Failed to decode log: {}", e));

		let (order_id, kind) = if topic0 == CancelRequested::SIGNATURE_HASH {
			let event = CancelRequested::decode_log(&prim_log, true).map_err(decode_err)?;
			(event.orderId, EscrowEventKind::CancelRequested)
		} else if topic0 == PaymentMarkedSent::SIGNATURE_HASH {
			let event = PaymentMarkedSent::decode_log(&prim_log, true).map_err(decode_err)?;
			(event.orderId, EscrowEventKind::PaymentMarkedSent)
		} else if topic0 == PaymentReleased::SIGNATURE_HASH {
			let event = PaymentReleased::decode_log(&prim_log, true).map_err(decode_err)?;
			(event.orderId, EscrowEventKind::PaymentReleased)
		} else if topic0 == OrderCancelled::SIGNATURE_HASH {
			let event = OrderCancelled::decode_log(&prim_log, true).map_err(decode_err)?;
			(event.orderId, EscrowEventKind::OrderCancelled)
		} else {
			return Ok(None);
		};

		let tx_hash = log
			.transaction_hash
			.ok_or_else(|| WatchError::ParseError("Log without transaction hash".to_string()))?;

		Ok(Some(EscrowEvent {
			chain_id,
			order_id: order_id.to_string(),
			kind,
			tx_hash: TransactionHash(tx_hash.0.to_vec()),
			block_number: log.block_number.unwrap_or(0),
			log_index: log.log_index.unwrap_or(0),
			timestamp: log.block_timestamp.unwrap_or_else(current_timestamp),
		}))
	}

	async fn watch_loop(
		chain: WatchedChain,
		start_block: Option<u64>,
		sender: mpsc::UnboundedSender<EscrowEvent>,
		mut stop_rx: mpsc::Receiver<()>,
		polling_interval: Duration,
	) {
		let mut interval = tokio::time::interval(polling_interval);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

		// Last block whose logs were delivered.
		let mut last_block = start_block.map(|b| b.saturating_sub(1));

		loop {
			tokio::select! {
				_ = interval.tick() => {
					let current_block = match chain.provider.get_block_number().await {
						Ok(block) => block,
						Err(e) => {
							tracing::error!(chain_id = chain.chain_id, "Failed to get block number: {}", e);
							continue;
						}
					};

					let from_block = match last_block {
						Some(last) if current_block <= last => continue,
						Some(last) => last + 1,
						None => {
							last_block = Some(current_block);
							continue;
						}
					};

					let filter = Filter::new()
						.address(chain.escrow)
						.event_signature(vec![
							CancelRequested::SIGNATURE_HASH,
							PaymentMarkedSent::SIGNATURE_HASH,
							PaymentReleased::SIGNATURE_HASH,
							OrderCancelled::SIGNATURE_HASH,
						])
						.from_block(from_block)
						.to_block(current_block);

					let mut logs = match chain.provider.get_logs(&filter).await {
						Ok(logs) => logs,
						Err(e) => {
							tracing::error!(chain_id = chain.chain_id, "Failed to get logs: {}", e);
							continue;
						}
					};

					// Consumers apply events in the order they are sent.
					logs.sort_by_key(|log| (log.block_number, log.log_index));
					for log in logs {
						match Self::parse_escrow_log(chain.chain_id, &log) {
							Ok(Some(event)) => {
								tracing::debug!(
									chain_id = chain.chain_id,
									order_id = %truncate_id(&event.order_id),
									kind = ?event.kind,
									"Observed escrow event"
								);
								if sender.send(event).is_err() {
									return;
								}
							}
							Ok(None) => {}
							Err(e) => tracing::warn!(chain_id = chain.chain_id, error = %e, "Skipping escrow log"),
						}
					}

					last_block = Some(current_block);
				}
				_ = stop_rx.recv() => {
					break;
				}
			}
		}
	}
}

pub struct EscrowWatcherSchema;

impl ConfigSchema for EscrowWatcherSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![],
			vec![
				Field::new(
					"network_ids",
					FieldType::Array(Box::new(FieldType::Integer {
						min: Some(1),
						max: None,
					})),
				),
				Field::new(
					"start_block",
					FieldType::Integer {
						min: Some(0),
						max: None,
					},
				),
				Field::new(
					"polling_interval_secs",
					FieldType::Integer {
						min: Some(1),
						max: Some(300),
					},
				),
			],
		)
		.validate(config)
	}
}

#[async_trait]
impl WatchInterface for EscrowWatcher {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(EscrowWatcherSchema)
	}

	async fn start_watching(
		&self,
		sender: mpsc::UnboundedSender<EscrowEvent>,
	) -> Result<(), WatchError> {
		if self.is_watching.swap(true, Ordering::SeqCst) {
			return Err(WatchError::AlreadyWatching);
		}

		let mut stop_signals = self.stop_signals.lock().await;
		for chain in &self.chains {
			let (stop_tx, stop_rx) = mpsc::channel(1);
			stop_signals.push(stop_tx);
			tracing::info!(chain_id = chain.chain_id, escrow = %chain.escrow, "Watching escrow");
			tokio::spawn(Self::watch_loop(
				chain.clone(),
				self.start_block,
				sender.clone(),
				stop_rx,
				self.polling_interval,
			));
		}
		Ok(())
	}

	async fn stop_watching(&self) -> Result<(), WatchError> {
		if !self.is_watching.load(Ordering::SeqCst) {
			return Ok(());
		}

		for stop_tx in self.stop_signals.lock().await.drain(..) {
			let _ = stop_tx.send(()).await;
		}

		self.is_watching.store(false, Ordering::SeqCst);
		Ok(())
	}
}

/// Configuration:
/// - `network_ids`: chains to watch (default: every chain with a deployed escrow)
/// - `start_block`: first block to scan (default: the head at startup)
/// - `polling_interval_secs`: poll interval (default: 5)
pub fn create_watcher(
	config: &toml::Value,
	networks: &NetworksConfig,
) -> Result<Box<dyn WatchInterface>, WatchError> {
	EscrowWatcherSchema
		.validate(config)
		.map_err(|e| WatchError::ValidationError(e.to_string()))?;

	let mut network_ids: Vec<u64> = match config.get("network_ids").and_then(|v| v.as_array()) {
		Some(ids) => ids
			.iter()
			.filter_map(|v| v.as_integer())
			.map(|v| v as u64)
			.collect(),
		None => networks.keys().copied().collect(),
	};
	network_ids.sort_unstable();

	let start_block = config
		.get("start_block")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64);
	let polling_interval = Duration::from_secs(
		config
			.get("polling_interval_secs")
			.and_then(|v| v.as_integer())
			.map(|v| v as u64)
			.unwrap_or(DEFAULT_POLLING_INTERVAL_SECS),
	);

	Ok(Box::new(EscrowWatcher::new(
		&network_ids,
		networks,
		start_block,
		polling_interval,
	)?))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "onchain_escrow";
	type Factory = WatchFactory;

	fn factory() -> Self::Factory {
		create_watcher
	}
}

impl WatchRegistry for Registry {}
