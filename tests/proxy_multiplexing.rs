use electrum_sync_proxy::cache::PersistentCache;
use electrum_sync_proxy::config::{ProxyConfig, SyncConfig};
use electrum_sync_proxy::electrum::ElectrumNotification;
use electrum_sync_proxy::proxy::CachingProxy;
use electrum_sync_proxy::trust::TrustStore;
use electrum_sync_proxy::wallet::{
	EngineError, Keychain, SyncCoordinator, SyncOutcome, TxDetails, WalletEngine, WalletEvent,
};

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};

const TXID_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const TXID_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const SCRIPT_HASH: &str = "8b01df4e368ea28f8dc0423bcf7a4923e3a12d307c875e47a0cfbf90b5c39161";
const WAIT: Duration = Duration::from_secs(5);

fn raw(txid: &str) -> String {
	format!("0200{}", &txid[..8])
}

/// Scripted single-connection Electrum server.
struct FakeServer {
	port: u16,
	requests: Arc<AtomicUsize>,
	pushes: Option<mpsc::UnboundedSender<String>>,
}

impl FakeServer {
	async fn spawn() -> Self {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let port = listener.local_addr().unwrap().port();
		let requests = Arc::new(AtomicUsize::new(0));
		let (pushes, push_rx) = mpsc::unbounded_channel();
		tokio::spawn(serve(listener, requests.clone(), push_rx));
		Self {
			port,
			requests,
			pushes: Some(pushes),
		}
	}

	fn requests(&self) -> usize {
		self.requests.load(Ordering::SeqCst)
	}

	fn push(&self, method: &str, params: Value) {
		let line = json!({ "jsonrpc": "2.0", "method": method, "params": params });
		self.pushes.as_ref().unwrap().send(line.to_string()).unwrap();
	}

	/// Close the upstream connection.
	fn hang_up(&mut self) {
		self.pushes.take();
	}
}

async fn serve(
	listener: TcpListener,
	requests: Arc<AtomicUsize>,
	mut pushes: mpsc::UnboundedReceiver<String>,
) {
	let (stream, _) = listener.accept().await.unwrap();
	let mut framed = Framed::new(stream, LinesCodec::new());
	loop {
		tokio::select! {
			line = framed.next() => {
				let Some(Ok(line)) = line else { break };
				requests.fetch_add(1, Ordering::SeqCst);
				let request: Value = serde_json::from_str(&line).unwrap();
				let reply = json!({
					"jsonrpc": "2.0",
					"id": request["id"],
					"result": respond(&request),
				});
				if framed.send(reply.to_string()).await.is_err() {
					break;
				}
			}
			push = pushes.recv() => {
				let Some(push) = push else { break };
				if framed.send(push).await.is_err() {
					break;
				}
			}
		}
	}
}

fn respond(request: &Value) -> Value {
	let params = &request["params"];
	match request["method"].as_str().unwrap_or_default() {
		"server.version" => json!(["fake 1.0", "1.4"]),
		"server.ping" => Value::Null,
		"blockchain.relayfee" => json!(0.00001),
		"blockchain.headers.subscribe" => json!({ "height": 800_000, "hex": "00" }),
		"blockchain.scripthash.subscribe" => {
			json!(format!("status-{}", &params[0].as_str().unwrap()[..8]))
		}
		"blockchain.transaction.get" => {
			let txid = params[0].as_str().unwrap();
			if params[1].as_bool().unwrap_or(false) {
				json!({ "txid": txid, "hex": raw(txid), "confirmations": 6 })
			} else {
				json!(raw(txid))
			}
		}
		_ => Value::Null,
	}
}

struct LocalClient {
	framed: Framed<TcpStream, LinesCodec>,
}

impl LocalClient {
	async fn connect(proxy: &CachingProxy) -> Self {
		let stream = TcpStream::connect(("127.0.0.1", proxy.local_port()))
			.await
			.unwrap();
		Self {
			framed: Framed::new(stream, LinesCodec::new()),
		}
	}

	async fn send(&mut self, message: Value) {
		self.framed.send(message.to_string()).await.unwrap();
	}

	async fn recv(&mut self) -> Value {
		let line = timeout(WAIT, self.framed.next())
			.await
			.unwrap()
			.unwrap()
			.unwrap();
		serde_json::from_str(&line).unwrap()
	}

	async fn call(&mut self, id: Value, method: &str, params: Value) -> Value {
		self.send(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
			.await;
		self.recv().await
	}
}

async fn start_proxy() -> (CachingProxy, FakeServer, Arc<PersistentCache>, tempfile::TempDir) {
	let server = FakeServer::spawn().await;
	let dir = tempfile::tempdir().unwrap();
	let config = ProxyConfig {
		host: "127.0.0.1".to_string(),
		port: server.port,
		use_tls: false,
		data_dir: dir.path().to_path_buf(),
		..Default::default()
	};
	let cache = Arc::new(PersistentCache::open(dir.path().to_path_buf()).await);
	let trust = TrustStore::new(dir.path().to_path_buf());
	let proxy = CachingProxy::start(config, cache.clone(), &trust)
		.await
		.unwrap();

	// Let the background relay fee query settle so request counts are stable.
	timeout(WAIT, async {
		while proxy.relay_fee().is_none() {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.unwrap();

	(proxy, server, cache, dir)
}

#[tokio::test]
async fn same_caller_ids_on_two_connections_are_not_crossed() {
	let (proxy, _server, _cache, _dir) = start_proxy().await;
	let mut a = LocalClient::connect(&proxy).await;
	let mut b = LocalClient::connect(&proxy).await;

	a.send(json!({ "jsonrpc": "2.0", "id": 1, "method": "blockchain.transaction.get", "params": [TXID_A] }))
		.await;
	b.send(json!({ "jsonrpc": "2.0", "id": 1, "method": "blockchain.transaction.get", "params": [TXID_B] }))
		.await;

	let reply_a = a.recv().await;
	let reply_b = b.recv().await;
	assert_eq!(reply_a["id"], json!(1));
	assert_eq!(reply_a["result"], json!(raw(TXID_A)));
	assert_eq!(reply_b["id"], json!(1));
	assert_eq!(reply_b["result"], json!(raw(TXID_B)));

	proxy.stop();
}

#[tokio::test]
async fn confirmed_transactions_are_served_from_cache() {
	let (proxy, server, cache, _dir) = start_proxy().await;
	cache.put(TXID_A, "cafe", true).await;
	let mut client = LocalClient::connect(&proxy).await;

	let before = server.requests();
	let reply = client
		.call(json!("x"), "blockchain.transaction.get", json!([TXID_A]))
		.await;
	assert_eq!(reply["result"], json!("cafe"));
	assert_eq!(server.requests(), before);

	// Unconfirmed lookups always reach the server, and the answer is cached.
	let reply = client
		.call(json!("y"), "blockchain.transaction.get", json!([TXID_B]))
		.await;
	assert_eq!(reply["result"], json!(raw(TXID_B)));
	assert_eq!(server.requests(), before + 1);
	let entry = cache.get_entry(TXID_B).await.unwrap();
	assert!(!entry.is_confirmed);

	// Only well-formed txids become cache keys.
	let reply = client
		.call(json!("z"), "blockchain.transaction.get", json!(["not-a-txid"]))
		.await;
	assert!(reply["result"].is_string());
	assert!(!cache.contains("not-a-txid").await);

	proxy.stop();
}

#[tokio::test]
async fn verbose_confirmation_promotes_cache_entry() {
	let (proxy, server, cache, _dir) = start_proxy().await;

	let verbose = proxy.get_transaction_verbose(TXID_B).await.unwrap();
	assert_eq!(verbose["confirmations"], json!(6));
	assert!(cache.get_entry(TXID_B).await.unwrap().is_confirmed);

	let before = server.requests();
	assert_eq!(proxy.get_transaction(TXID_B).await.unwrap(), raw(TXID_B));
	assert_eq!(server.requests(), before);

	proxy.stop();
}

#[tokio::test]
async fn pushes_reach_notification_stream_and_subscribed_clients() {
	let (proxy, server, _cache, _dir) = start_proxy().await;
	let mut notifications = proxy.take_notifications().unwrap();

	let statuses = proxy
		.start_subscriptions(&[SCRIPT_HASH.to_string()])
		.await
		.unwrap();
	assert_eq!(statuses[SCRIPT_HASH], Some("status-8b01df4e".to_string()));
	assert_eq!(proxy.tip_height(), Some(800_000));

	let mut client = LocalClient::connect(&proxy).await;
	let reply = client
		.call(json!(7), "blockchain.scripthash.subscribe", json!([SCRIPT_HASH]))
		.await;
	assert_eq!(reply["result"], json!("status-8b01df4e"));

	server.push(
		"blockchain.scripthash.subscribe",
		json!([SCRIPT_HASH, "fresh-status"]),
	);

	let notification = timeout(WAIT, notifications.recv()).await.unwrap().unwrap();
	assert_eq!(
		notification,
		ElectrumNotification::ScriptHashChanged {
			script_hash: SCRIPT_HASH.to_string(),
			new_status: Some("fresh-status".to_string()),
		}
	);
	assert_eq!(
		proxy.live_statuses()[SCRIPT_HASH],
		Some("fresh-status".to_string())
	);
	assert_eq!(
		proxy.check_for_script_hash_changes(&statuses),
		vec![SCRIPT_HASH.to_string()]
	);

	let forwarded = client.recv().await;
	assert_eq!(forwarded["method"], json!("blockchain.scripthash.subscribe"));
	assert_eq!(forwarded["params"][1], json!("fresh-status"));

	server.push("blockchain.headers.subscribe", json!([{ "height": 800_001, "hex": "00" }]));
	let notification = timeout(WAIT, notifications.recv()).await.unwrap().unwrap();
	assert_eq!(
		notification,
		ElectrumNotification::NewBlockHeader { height: 800_001 }
	);
	assert_eq!(proxy.tip_height(), Some(800_001));

	proxy.stop();
}

#[tokio::test]
async fn batch_replies_arrive_as_one_array_in_order() {
	let (proxy, _server, _cache, _dir) = start_proxy().await;
	let mut client = LocalClient::connect(&proxy).await;

	client
		.send(json!([
			{ "jsonrpc": "2.0", "id": "a", "method": "blockchain.transaction.get", "params": [TXID_A] },
			{ "jsonrpc": "2.0", "id": "b", "method": "server.version", "params": ["client", "1.4"] },
			{ "jsonrpc": "2.0", "id": "c", "method": "server.ping", "params": [] },
		]))
		.await;

	let reply = client.recv().await;
	let replies = reply.as_array().unwrap();
	assert_eq!(replies.len(), 3);
	assert_eq!(replies[0]["id"], json!("a"));
	assert_eq!(replies[0]["result"], json!(raw(TXID_A)));
	assert_eq!(replies[1]["id"], json!("b"));
	assert_eq!(replies[1]["result"], json!(["fake 1.0", "1.4"]));
	assert_eq!(replies[2]["id"], json!("c"));

	proxy.stop();
}

#[tokio::test]
async fn stop_closes_clients_and_ends_notifications() {
	let (proxy, _server, _cache, _dir) = start_proxy().await;
	let mut notifications = proxy.take_notifications().unwrap();
	let mut client = LocalClient::connect(&proxy).await;
	client
		.call(json!(1), "server.ping", json!([]))
		.await;

	proxy.stop();
	proxy.stop();

	assert!(timeout(WAIT, notifications.recv()).await.unwrap().is_none());
	let next = timeout(WAIT, client.framed.next()).await.unwrap();
	assert!(next.is_none() || next.is_some_and(|r| r.is_err()));
	assert!(proxy.ping().await.is_err());
}

#[tokio::test]
async fn upstream_loss_stops_the_proxy() {
	let (proxy, mut server, _cache, _dir) = start_proxy().await;
	let mut notifications = proxy.take_notifications().unwrap();

	server.hang_up();

	assert!(timeout(WAIT, notifications.recv()).await.unwrap().is_none());
	assert!(!proxy.is_running());
	assert!(proxy.ping().await.is_err());
}

/// Wallet engine whose discovery scan looks up its one known transaction through a local
/// proxy connection, the way an Electrum client library would.
struct LocalClientEngine {
	port: u16,
	known: TxDetails,
	fetched: Mutex<Option<Value>>,
}

#[async_trait::async_trait]
impl WalletEngine for LocalClientEngine {
	type Update = ();

	async fn start_sync_with_revealed_spks(&self, _batch_size: usize) -> Result<(), EngineError> {
		Ok(())
	}

	async fn start_full_scan(&self, _stop_gap: usize, _batch_size: usize) -> Result<(), EngineError> {
		let stream = TcpStream::connect(("127.0.0.1", self.port)).await.unwrap();
		let mut framed = Framed::new(stream, LinesCodec::new());
		let request = json!({
			"jsonrpc": "2.0",
			"id": 1,
			"method": "blockchain.transaction.get",
			"params": [self.known.txid],
		});
		framed.send(request.to_string()).await.unwrap();
		let line = framed.next().await.unwrap().unwrap();
		*self.fetched.lock().unwrap() = Some(serde_json::from_str(&line).unwrap());
		Ok(())
	}

	async fn apply_update_events(&self, _update: ()) -> Result<Vec<WalletEvent>, EngineError> {
		Ok(Vec::new())
	}

	fn revealed_script_pubkeys(&self, _keychain: Keychain) -> Vec<Vec<u8>> {
		Vec::new()
	}

	fn latest_checkpoint_height(&self) -> u32 {
		0
	}

	fn transaction(&self, txid: &str) -> Option<TxDetails> {
		(txid == self.known.txid).then(|| self.known.clone())
	}

	fn transactions(&self) -> Vec<TxDetails> {
		vec![self.known.clone()]
	}
}

#[tokio::test]
async fn full_sync_prewarm_serves_engine_fetches_from_cache() {
	let (proxy, server, cache, dir) = start_proxy().await;
	let engine = Arc::new(LocalClientEngine {
		port: proxy.local_port(),
		known: TxDetails {
			txid: TXID_A.to_string(),
			net_value: 5_000,
			fee: None,
			confirmation_height: Some(799_990),
		},
		fetched: Mutex::new(None),
	});
	let coordinator = SyncCoordinator::new(
		engine.clone(),
		Arc::new(proxy.clone()),
		cache.clone(),
		SyncConfig::default(),
		dir.path().to_path_buf(),
	)
	.await;

	let before = server.requests();
	let outcome = coordinator.full_sync().await.unwrap();
	assert!(matches!(outcome, SyncOutcome::Synced { .. }));

	// One upstream fetch for the prewarm; the engine's own lookup hit the cache.
	assert_eq!(server.requests(), before + 1);
	let fetched = engine.fetched.lock().unwrap().take().unwrap();
	assert_eq!(fetched["result"], json!(raw(TXID_A)));
	assert!(cache.get_entry(TXID_A).await.unwrap().is_confirmed);

	proxy.stop();
}
