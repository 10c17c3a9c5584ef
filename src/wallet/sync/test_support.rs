//! In-memory engine and backend doubles for coordinator and listener tests.

use crate::cache::PersistentCache;
use crate::config::SyncConfig;
use crate::electrum::StatusMap;
use crate::proxy::ProxyError;
use crate::wallet::backend::ElectrumBackend;
use crate::wallet::engine::{EngineError, WalletEngine};
use crate::wallet::sync::coordinator::SyncCoordinator;
use crate::wallet::types::{Keychain, TxDetails, WalletEvent};

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) struct MockEngine {
	pub syncs: AtomicUsize,
	pub full_scans: AtomicUsize,
	pub last_batch_size: AtomicUsize,
	pub fail_full_scan: AtomicBool,
	/// Most full scans seen running at the same time.
	pub peak_full_scans: AtomicUsize,
	active_full_scans: AtomicUsize,
	checkpoint: AtomicU32,
	sync_delay: Mutex<Duration>,
	full_scan_delay: Mutex<Duration>,
	events: Mutex<Vec<WalletEvent>>,
	txs: Mutex<HashMap<String, TxDetails>>,
	spks: Mutex<Vec<Vec<u8>>>,
}

impl MockEngine {
	pub fn new(checkpoint: u32) -> Self {
		Self {
			syncs: AtomicUsize::new(0),
			full_scans: AtomicUsize::new(0),
			last_batch_size: AtomicUsize::new(0),
			fail_full_scan: AtomicBool::new(false),
			peak_full_scans: AtomicUsize::new(0),
			active_full_scans: AtomicUsize::new(0),
			checkpoint: AtomicU32::new(checkpoint),
			sync_delay: Mutex::new(Duration::ZERO),
			full_scan_delay: Mutex::new(Duration::ZERO),
			events: Mutex::new(Vec::new()),
			txs: Mutex::new(HashMap::new()),
			spks: Mutex::new((0..3u8).map(|i| vec![0x00, 0x14, i]).collect()),
		}
	}

	pub fn set_sync_delay(&self, delay: Duration) {
		*self.sync_delay.lock().unwrap() = delay;
	}

	pub fn set_full_scan_delay(&self, delay: Duration) {
		*self.full_scan_delay.lock().unwrap() = delay;
	}

	pub fn set_events(&self, events: Vec<WalletEvent>) {
		*self.events.lock().unwrap() = events;
	}

	pub fn add_transaction(&self, txid: &str, net_value: i64, height: Option<u32>) {
		self.txs.lock().unwrap().insert(
			txid.to_string(),
			TxDetails {
				txid: txid.to_string(),
				net_value,
				fee: None,
				confirmation_height: height,
			},
		);
	}

	pub fn reveal(&self, spk: Vec<u8>) {
		self.spks.lock().unwrap().push(spk);
	}

	pub fn spks(&self) -> Vec<Vec<u8>> {
		self.spks.lock().unwrap().clone()
	}
}

#[async_trait::async_trait]
impl WalletEngine for MockEngine {
	type Update = Vec<WalletEvent>;

	async fn start_sync_with_revealed_spks(
		&self,
		batch_size: usize,
	) -> Result<Self::Update, EngineError> {
		self.syncs.fetch_add(1, Ordering::SeqCst);
		self.last_batch_size.store(batch_size, Ordering::SeqCst);
		let delay = *self.sync_delay.lock().unwrap();
		tokio::time::sleep(delay).await;
		Ok(self.events.lock().unwrap().clone())
	}

	async fn start_full_scan(
		&self,
		_stop_gap: usize,
		_batch_size: usize,
	) -> Result<Self::Update, EngineError> {
		self.full_scans.fetch_add(1, Ordering::SeqCst);
		let active = self.active_full_scans.fetch_add(1, Ordering::SeqCst) + 1;
		self.peak_full_scans.fetch_max(active, Ordering::SeqCst);
		let delay = *self.full_scan_delay.lock().unwrap();
		tokio::time::sleep(delay).await;
		self.active_full_scans.fetch_sub(1, Ordering::SeqCst);

		if self.fail_full_scan.load(Ordering::SeqCst) {
			return Err(EngineError::Other("scan aborted".to_string()));
		}
		self.checkpoint.store(100, Ordering::SeqCst);
		Ok(self.events.lock().unwrap().clone())
	}

	async fn apply_update_events(
		&self,
		update: Self::Update,
	) -> Result<Vec<WalletEvent>, EngineError> {
		Ok(update)
	}

	fn revealed_script_pubkeys(&self, keychain: Keychain) -> Vec<Vec<u8>> {
		match keychain {
			Keychain::External => self.spks(),
			Keychain::Internal => Vec::new(),
		}
	}

	fn latest_checkpoint_height(&self) -> u32 {
		self.checkpoint.load(Ordering::SeqCst)
	}

	fn transaction(&self, txid: &str) -> Option<TxDetails> {
		self.txs.lock().unwrap().get(txid).cloned()
	}

	fn transactions(&self) -> Vec<TxDetails> {
		self.txs.lock().unwrap().values().cloned().collect()
	}
}

/// Server double: a status table plus the set of subscribed script hashes.
#[derive(Default)]
pub(crate) struct MockBackend {
	statuses: Mutex<StatusMap>,
	subscribed: Mutex<BTreeSet<String>>,
	tip: Mutex<Option<u32>>,
}

impl MockBackend {
	pub fn set_status(&self, script_hash: &str, status: Option<&str>) {
		self.statuses
			.lock()
			.unwrap()
			.insert(script_hash.to_string(), status.map(str::to_string));
	}

	pub fn set_tip(&self, tip: Option<u32>) {
		*self.tip.lock().unwrap() = tip;
	}

	pub fn is_subscribed(&self, script_hash: &str) -> bool {
		self.subscribed.lock().unwrap().contains(script_hash)
	}

	fn lookup(&self, script_hashes: &[String]) -> StatusMap {
		let statuses = self.statuses.lock().unwrap();
		script_hashes
			.iter()
			.map(|sh| (sh.clone(), statuses.get(sh).cloned().flatten()))
			.collect()
	}

	fn subscribe(&self, script_hashes: &[String]) -> StatusMap {
		self.subscribed
			.lock()
			.unwrap()
			.extend(script_hashes.iter().cloned());
		self.lookup(script_hashes)
	}
}

#[async_trait::async_trait]
impl ElectrumBackend for MockBackend {
	async fn ping(&self) -> Result<(), ProxyError> {
		Ok(())
	}

	async fn fetch_statuses(&self, script_hashes: &[String]) -> Result<StatusMap, ProxyError> {
		Ok(self.lookup(script_hashes))
	}

	async fn start_subscriptions(&self, script_hashes: &[String]) -> Result<StatusMap, ProxyError> {
		Ok(self.subscribe(script_hashes))
	}

	async fn subscribe_additional_script_hashes(
		&self,
		script_hashes: &[String],
	) -> Result<StatusMap, ProxyError> {
		Ok(self.subscribe(script_hashes))
	}

	fn live_statuses(&self) -> StatusMap {
		let subscribed: Vec<String> = self.subscribed.lock().unwrap().iter().cloned().collect();
		self.lookup(&subscribed)
	}

	fn tip_height(&self) -> Option<u32> {
		*self.tip.lock().unwrap()
	}

	async fn pipeline_fetch_transactions(&self, txids: &[String]) -> Result<usize, ProxyError> {
		Ok(txids.len())
	}
}

pub(crate) async fn coordinator(
	engine: Arc<MockEngine>,
	backend: Arc<MockBackend>,
	config: SyncConfig,
	dir: &tempfile::TempDir,
) -> (SyncCoordinator<MockEngine>, Arc<PersistentCache>) {
	let cache = Arc::new(PersistentCache::open(dir.path().to_path_buf()).await);
	let coordinator = SyncCoordinator::new(
		engine,
		backend,
		cache.clone(),
		config,
		dir.path().to_path_buf(),
	)
	.await;
	(coordinator, cache)
}
