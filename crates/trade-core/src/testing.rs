//! Shared fixtures for coordinator tests.

use crate::engine::event_bus::EventBus;
use crate::engine::locks::KeyedLocks;
use crate::guard::AccessGuard;
use crate::handlers::{OrderHandler, TransitionHandler};
use crate::propagation::{BusChangeFeed, ChangePropagator};
use crate::recovery::{ReconciliationQueue, RecoveryService};
use crate::state::order::tests::new_order;
use crate::state::OrderRepository;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use trade_account::{implementations::local::LocalAccounts, AccountService};
use trade_auth::{implementations::static_tokens::StaticTokens, AuthService};
use trade_delivery::{DeliveryError, DeliveryInterface, DeliveryService};
use trade_storage::{
	implementations::memory::MemoryStorage, StorageError, StorageInterface, StorageService,
};
use trade_types::{
	ConfigSchema, NetworkConfig, NetworksConfig, Order, Schema, SecretString, Transaction,
	TransactionHash, TransactionReceipt, User, ValidationError,
};

pub const CHAIN_ID: u64 = 31337;
/// Configured in the fixture but without an escrow deployment.
pub const UNDEPLOYED_CHAIN_ID: u64 = 11155111;
pub const ESCROW: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
pub const MAKER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const TAKER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmBehaviour {
	Success,
	Revert,
	/// Confirmation never arrives; the receipt stays unknown.
	Timeout,
}

struct NoSchema;

impl ConfigSchema for NoSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Scripted escrow chain counting every call made to it.
pub struct MockChain {
	submits: AtomicUsize,
	confirms: AtomicUsize,
	behaviour: Mutex<ConfirmBehaviour>,
	confirm_delay: Mutex<Duration>,
	receipts: Mutex<HashMap<TransactionHash, bool>>,
}

impl MockChain {
	pub fn new() -> Self {
		Self {
			submits: AtomicUsize::new(0),
			confirms: AtomicUsize::new(0),
			behaviour: Mutex::new(ConfirmBehaviour::Success),
			confirm_delay: Mutex::new(Duration::ZERO),
			receipts: Mutex::new(HashMap::new()),
		}
	}

	pub fn submits(&self) -> usize {
		self.submits.load(Ordering::SeqCst)
	}

	pub fn confirms(&self) -> usize {
		self.confirms.load(Ordering::SeqCst)
	}

	pub fn set_behaviour(&self, behaviour: ConfirmBehaviour) {
		*self.behaviour.lock().unwrap() = behaviour;
	}

	pub fn set_confirm_delay(&self, delay: Duration) {
		*self.confirm_delay.lock().unwrap() = delay;
	}

	/// Makes a receipt visible to later lookups.
	pub fn set_receipt(&self, hash: &TransactionHash, success: bool) {
		self.receipts.lock().unwrap().insert(hash.clone(), success);
	}
}

#[async_trait]
impl DeliveryInterface for MockChain {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(NoSchema)
	}

	async fn submit(&self, _tx: Transaction) -> Result<TransactionHash, DeliveryError> {
		let n = self.submits.fetch_add(1, Ordering::SeqCst);
		let mut hash = vec![0xab; 32];
		hash[31] = n as u8;
		Ok(TransactionHash(hash))
	}

	async fn wait_for_confirmation(
		&self,
		hash: &TransactionHash,
		_chain_id: u64,
		_confirmations: u64,
	) -> Result<TransactionReceipt, DeliveryError> {
		self.confirms.fetch_add(1, Ordering::SeqCst);
		let delay = *self.confirm_delay.lock().unwrap();
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}
		let behaviour = *self.behaviour.lock().unwrap();
		let success = match behaviour {
			ConfirmBehaviour::Success => true,
			ConfirmBehaviour::Revert => false,
			ConfirmBehaviour::Timeout => {
				return Err(DeliveryError::Network(format!(
					"transaction {} not confirmed in time",
					hash
				)))
			},
		};
		self.set_receipt(hash, success);
		Ok(TransactionReceipt {
			hash: hash.clone(),
			block_number: 42,
			success,
		})
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
		_chain_id: u64,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		Ok(self
			.receipts
			.lock()
			.unwrap()
			.get(hash)
			.map(|success| TransactionReceipt {
				hash: hash.clone(),
				block_number: 42,
				success: *success,
			}))
	}
}

/// Memory storage whose order writes can be made to fail.
pub struct FlakyStorage {
	inner: MemoryStorage,
	fail_order_writes: Arc<AtomicBool>,
}

#[async_trait]
impl StorageInterface for FlakyStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.inner.get_bytes(key).await
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		if key.starts_with("orders:") && self.fail_order_writes.load(Ordering::SeqCst) {
			return Err(StorageError::Backend("connection reset".into()));
		}
		self.inner.set_bytes(key, value, ttl).await
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.inner.delete(key).await
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		self.inner.exists(key).await
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		self.inner.list_keys(prefix).await
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(NoSchema)
	}
}

pub fn networks() -> NetworksConfig {
	NetworksConfig::from([
		(CHAIN_ID, NetworkConfig {
			rpc_url: "http://localhost:8545".into(),
			escrow_address: Some(ESCROW.into()),
			block_time_seconds: Some(1),
		}),
		(UNDEPLOYED_CHAIN_ID, NetworkConfig {
			rpc_url: "http://localhost:8546".into(),
			escrow_address: None,
			block_time_seconds: None,
		}),
	])
}

/// A coordinator wired against [`MockChain`] and [`FlakyStorage`], with
/// users `maker`, `taker` and `eve` and order `"1"` open between the first two.
pub struct Fixture {
	pub chain: Arc<MockChain>,
	fail_order_writes: Arc<AtomicBool>,
	pub storage: Arc<StorageService>,
	pub event_bus: EventBus,
	pub auth: Arc<AuthService>,
	pub repository: Arc<OrderRepository>,
	pub guard: Arc<AccessGuard>,
	pub delivery: Arc<DeliveryService>,
	pub queue: Arc<ReconciliationQueue>,
	pub order_locks: Arc<KeyedLocks>,
	pub recovery: Arc<RecoveryService>,
	pub transitions: TransitionHandler,
	pub orders: OrderHandler,
}

impl Fixture {
	pub async fn new() -> Self {
		let chain = Arc::new(MockChain::new());
		let fail_order_writes = Arc::new(AtomicBool::new(false));
		let storage = Arc::new(StorageService::new(Box::new(FlakyStorage {
			inner: MemoryStorage::new(),
			fail_order_writes: fail_order_writes.clone(),
		})));
		let event_bus = EventBus::new(64);

		let tokens = HashMap::from([
			("maker-token".to_string(), "sub-maker".to_string()),
			("taker-token".to_string(), "sub-taker".to_string()),
			("eve-token".to_string(), "sub-eve".to_string()),
		]);
		let auth = Arc::new(AuthService::new(Box::new(StaticTokens::new(tokens))));

		let repository = Arc::new(
			OrderRepository::new(storage.clone(), event_bus.clone()).with_confirm_window(Some(3600)),
		);
		for (id, subject) in [("maker", "sub-maker"), ("taker", "sub-taker"), ("eve", "sub-eve")] {
			repository
				.put_user(&User {
					id: id.into(),
					subject: subject.into(),
					address: None,
				})
				.await
				.unwrap();
		}
		repository
			.create_order(Order::open(new_order("1"), 1_000))
			.await
			.unwrap();

		let accounts = LocalAccounts::new(vec![
			SecretString::from(MAKER_KEY),
			SecretString::from(TAKER_KEY),
		])
		.unwrap();
		let providers: HashMap<u64, Arc<dyn DeliveryInterface>> =
			HashMap::from([(CHAIN_ID, chain.clone() as Arc<dyn DeliveryInterface>)]);
		let delivery = Arc::new(DeliveryService::new(
			providers,
			Arc::new(AccountService::new(Box::new(accounts))),
			networks(),
			1,
		));

		let guard = Arc::new(AccessGuard::new(repository.clone()));
		let queue = Arc::new(ReconciliationQueue::new(storage.clone()));
		let order_locks = Arc::new(KeyedLocks::new());
		let recovery = Arc::new(RecoveryService::new(
			repository.clone(),
			delivery.clone(),
			queue.clone(),
			order_locks.clone(),
			event_bus.clone(),
			30,
		));
		let transitions = TransitionHandler::new(
			auth.clone(),
			guard.clone(),
			repository.clone(),
			delivery.clone(),
			queue.clone(),
			order_locks.clone(),
			event_bus.clone(),
		);
		let propagator = Arc::new(ChangePropagator::new(
			Arc::new(BusChangeFeed::new(event_bus.clone())),
			Duration::from_secs(1),
			16,
		));
		let orders = OrderHandler::new(auth.clone(), guard.clone(), repository.clone(), propagator);

		Self {
			chain,
			fail_order_writes,
			storage,
			event_bus,
			auth,
			repository,
			guard,
			delivery,
			queue,
			order_locks,
			recovery,
			transitions,
			orders,
		}
	}

	pub fn maker_token(&self) -> SecretString {
		SecretString::from("maker-token")
	}

	pub fn taker_token(&self) -> SecretString {
		SecretString::from("taker-token")
	}

	pub fn eve_token(&self) -> SecretString {
		SecretString::from("eve-token")
	}

	pub fn fail_order_writes(&self, fail: bool) {
		self.fail_order_writes.store(fail, Ordering::SeqCst);
	}

	pub async fn order(&self, order_id: &str) -> Order {
		self.repository.get_order(order_id).await.unwrap()
	}
}
