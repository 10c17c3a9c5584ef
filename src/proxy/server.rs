//! Caching multiplexing proxy.
//!
//! One upstream connection is shared by every local client and by the library API. Each
//! request is forwarded under a fresh process-unique id and the response is routed back
//! with the caller's id restored. Confirmed transactions are answered from the persistent
//! cache, server pushes are republished as `ElectrumNotification`s and fanned out to the
//! local sessions that subscribed to them.

use crate::cache::PersistentCache;
use crate::config::ProxyConfig;
use crate::electrum::{
	CLIENT_NAME, ElectrumError, ElectrumNotification, PROTOCOL_VERSION, Request, Response,
	ServerPush, StatusMap, UpstreamMessage, header_height, is_txid, methods,
};
use crate::proxy::router::{BatchCollector, BatchSlot, Origin, PendingRequest, RequestRouter};
use crate::proxy::session::{MAX_LINE_LENGTH, SessionHandle, serve_session, write_lines};
use crate::proxy::types::{ProxyError, VerifiedUpstream};
use crate::proxy::upstream::verify_upstream;
use crate::trust::TrustStore;

use futures::future::join_all;
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const INTERNAL_ERROR: i64 = -32603;

/// Proxy state derived from upstream traffic.
#[derive(Debug, Default)]
struct ProxyState {
	/// `server.version` result, negotiated once per upstream connection.
	server_version: Option<Value>,
	/// Script hashes subscribed upstream on this connection.
	subscribed: BTreeSet<String>,
	/// Latest status per subscribed script hash, from replies and pushes.
	live_statuses: StatusMap,
	tip_height: Option<u32>,
	relay_fee: Option<f64>,
}

/// A request written upstream whose reply has not been awaited yet.
pub(crate) struct Inflight {
	id: u64,
	reply: oneshot::Receiver<Result<Value, ProxyError>>,
}

/// State shared by the listener, the sessions, the upstream tasks and the public handle.
pub(crate) struct ProxyShared {
	config: ProxyConfig,
	cache: Arc<PersistentCache>,
	router: RequestRouter,
	upstream: mpsc::UnboundedSender<String>,
	sessions: Mutex<HashMap<u64, SessionHandle>>,
	state: Mutex<ProxyState>,
	notifications: Mutex<Option<mpsc::Sender<ElectrumNotification>>>,
	shutdown: CancellationToken,
	stopped: AtomicBool,
	next_session_id: AtomicU64,
}

impl ProxyShared {
	pub(crate) fn shutdown_token(&self) -> CancellationToken {
		self.shutdown.clone()
	}

	pub(crate) fn open_session(&self, session_id: u64, handle: SessionHandle) {
		self.sessions().insert(session_id, handle);
	}

	pub(crate) fn close_session(&self, session_id: u64) {
		self.sessions().remove(&session_id);
		let dropped = self.router.forget_session(session_id);
		if dropped > 0 {
			debug!(
				"Discarding {} in-flight requests of closed session {}",
				dropped, session_id
			);
		}
	}

	/// Handle one line from a local client: a single request or a batch.
	pub(crate) async fn handle_local_line(&self, session_id: u64, line: &str) {
		let value: Value = match serde_json::from_str(line) {
			Ok(value) => value,
			Err(e) => {
				let reply = Response::failure(Value::Null, PARSE_ERROR, format!("parse error: {}", e));
				self.reply_local(session_id, None, reply);
				return;
			}
		};

		match value {
			Value::Array(items) if !items.is_empty() => {
				let collector = Arc::new(BatchCollector::new(items.len()));
				for (index, item) in items.into_iter().enumerate() {
					let slot = BatchSlot {
						collector: collector.clone(),
						index,
					};
					self.handle_local_request(session_id, item, Some(slot)).await;
				}
			}
			other => self.handle_local_request(session_id, other, None).await,
		}
	}

	async fn handle_local_request(&self, session_id: u64, value: Value, batch: Option<BatchSlot>) {
		let request: Request = match serde_json::from_value(value.clone()) {
			Ok(request) => request,
			Err(e) => {
				let id = value.get("id").cloned().unwrap_or(Value::Null);
				let reply = Response::failure(id, INVALID_REQUEST, format!("invalid request: {}", e));
				self.reply_local(session_id, batch, reply);
				return;
			}
		};

		// Upstream subscriptions are shared, so a local unsubscribe only drops this
		// session's interest.
		if request.method == methods::SCRIPTHASH_UNSUBSCRIBE {
			let removed = request.str_param(0).is_some_and(|sh| {
				self.sessions()
					.get_mut(&session_id)
					.is_some_and(|s| s.interests.script_hashes.remove(sh))
			});
			self.reply_local(session_id, batch, Response::success(request.id, json!(removed)));
			return;
		}

		if let Some(result) = self.answer_locally(&request).await {
			debug!("Answered {} locally for session {}", request.method, session_id);
			self.reply_local(session_id, batch, Response::success(request.id, result));
			return;
		}

		let pending = PendingRequest {
			origin: Origin::Local {
				session_id,
				original_id: request.id.clone(),
				batch,
			},
			request,
		};
		self.send_upstream(pending);
	}

	/// Requests that never need the upstream server.
	async fn answer_locally(&self, request: &Request) -> Option<Value> {
		match request.method.as_str() {
			methods::SERVER_VERSION => self.server_version(),
			methods::TRANSACTION_GET if !request.is_verbose() => {
				let txid = request.str_param(0).filter(|t| is_txid(t))?;
				let entry = self.cache.get_entry(txid).await?;
				entry.is_confirmed.then_some(Value::String(entry.raw_hex))
			}
			_ => None,
		}
	}

	/// Rewrite the id, register the route and queue the request on the upstream writer.
	/// Failures are delivered to the origin.
	fn send_upstream(&self, pending: PendingRequest) -> Option<u64> {
		if self.stopped.load(Ordering::SeqCst) {
			self.fail_pending(pending, ProxyError::NotRunning);
			return None;
		}

		let id = self.router.next_id();
		let upstream_request = Request::new(
			Value::from(id),
			&pending.request.method,
			pending.request.params.clone(),
		);
		let line = match serde_json::to_string(&upstream_request) {
			Ok(line) => line,
			Err(e) => {
				let err = ElectrumError::Malformed(format!("unserializable request: {}", e));
				self.fail_pending(pending, err.into());
				return None;
			}
		};

		self.router.register(id, pending);
		if self.upstream.send(line).is_err() {
			if let Some(pending) = self.router.complete(id) {
				self.fail_pending(pending, ProxyError::ConnectionLost);
			}
			return None;
		}
		Some(id)
	}

	/// Issue a request on behalf of the library API without waiting for the reply.
	pub(crate) fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Inflight, ProxyError> {
		let (tx, reply) = oneshot::channel();
		let pending = PendingRequest {
			origin: Origin::Internal(tx),
			request: Request::new(Value::Null, method, params),
		};
		let id = self.send_upstream(pending).ok_or_else(|| {
			if self.stopped.load(Ordering::SeqCst) {
				ProxyError::NotRunning
			} else {
				ProxyError::ConnectionLost
			}
		})?;
		Ok(Inflight { id, reply })
	}

	/// Wait for a dispatched request, bounded by the request timeout.
	pub(crate) async fn await_reply(&self, inflight: Inflight) -> Result<Value, ProxyError> {
		match timeout(self.config.request_timeout, inflight.reply).await {
			Ok(Ok(result)) => result,
			Ok(Err(_)) => Err(ProxyError::ConnectionLost),
			Err(_) => {
				self.router.complete(inflight.id);
				Err(ProxyError::Timeout("upstream request"))
			}
		}
	}

	pub(crate) async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, ProxyError> {
		let inflight = self.dispatch(method, params)?;
		self.await_reply(inflight).await
	}

	async fn handle_upstream_line(&self, line: &str) {
		match UpstreamMessage::parse(line) {
			Ok(UpstreamMessage::Response(response)) => self.handle_response(response).await,
			Ok(UpstreamMessage::Push(push)) => self.handle_push(&push, line),
			Err(e) => warn!("Discarding upstream message: {}", e),
		}
	}

	async fn handle_response(&self, response: Response) {
		let Some(id) = response.id.as_u64() else {
			warn!("Upstream response with foreign id {}", response.id);
			return;
		};
		let Some(pending) = self.router.complete(id) else {
			debug!("No caller waiting for upstream id {}", id);
			return;
		};

		self.observe_response(&pending, &response).await;

		match pending.origin {
			Origin::Local {
				session_id,
				original_id,
				batch,
			} => {
				let reply = Response {
					id: original_id,
					..response
				};
				self.reply_local(session_id, batch, reply);
			}
			Origin::Internal(tx) => {
				let _ = tx.send(response.into_result().map_err(ProxyError::from));
			}
		}
	}

	/// Fold a successful response into the cache and the proxy state.
	async fn observe_response(&self, pending: &PendingRequest, response: &Response) {
		if response.error.as_ref().is_some_and(|e| !e.is_null()) {
			return;
		}
		let request = &pending.request;
		let result = &response.result;

		match request.method.as_str() {
			methods::TRANSACTION_GET => self.cache_transaction(request, result).await,
			methods::SCRIPTHASH_SUBSCRIBE => {
				let Some(script_hash) = request.str_param(0) else {
					return;
				};
				{
					let mut state = self.state();
					state.subscribed.insert(script_hash.to_string());
					state
						.live_statuses
						.insert(script_hash.to_string(), result.as_str().map(str::to_string));
				}
				if let Origin::Local { session_id, .. } = &pending.origin {
					if let Some(session) = self.sessions().get_mut(session_id) {
						session.interests.script_hashes.insert(script_hash.to_string());
					}
				}
			}
			methods::HEADERS_SUBSCRIBE => {
				if let Some(height) = header_height(result) {
					self.state().tip_height = Some(height);
				}
				if let Origin::Local { session_id, .. } = &pending.origin {
					if let Some(session) = self.sessions().get_mut(session_id) {
						session.interests.headers = true;
					}
				}
			}
			methods::SERVER_VERSION => {
				self.state().server_version.get_or_insert_with(|| result.clone());
			}
			methods::RELAY_FEE => {
				self.state().relay_fee = result.as_f64();
			}
			_ => {}
		}
	}

	async fn cache_transaction(&self, request: &Request, result: &Value) {
		let Some(txid) = request.str_param(0).filter(|t| is_txid(t)) else {
			return;
		};
		if request.is_verbose() {
			let Some(raw_hex) = result.get("hex").and_then(Value::as_str) else {
				return;
			};
			let confirmations = result
				.get("confirmations")
				.and_then(Value::as_u64)
				.unwrap_or(0);
			self.cache.put(txid, raw_hex, confirmations > 0).await;
		} else if let Some(raw_hex) = result.as_str() {
			self.cache.put(txid, raw_hex, false).await;
		}
	}

	fn handle_push(&self, push: &ServerPush, raw_line: &str) {
		let notification = ElectrumNotification::from_push(push);

		match &notification {
			Some(ElectrumNotification::NewBlockHeader { height }) => {
				self.state().tip_height = Some(*height);
			}
			Some(ElectrumNotification::ScriptHashChanged {
				script_hash,
				new_status,
			}) => {
				self.state()
					.live_statuses
					.insert(script_hash.clone(), new_status.clone());
			}
			None => debug!("Ignoring push for {}", push.method),
		}

		self.fan_out(push, raw_line);

		if let Some(notification) = notification {
			self.publish(notification);
		}
	}

	/// Forward a push verbatim to every local session that subscribed to it.
	fn fan_out(&self, push: &ServerPush, raw_line: &str) {
		let script_hash = push.params.first().and_then(Value::as_str);
		let sessions = self.sessions();
		for session in sessions.values() {
			let interested = match push.method.as_str() {
				methods::HEADERS_SUBSCRIBE => session.interests.headers,
				methods::SCRIPTHASH_SUBSCRIBE => {
					script_hash.is_some_and(|sh| session.interests.script_hashes.contains(sh))
				}
				_ => false,
			};
			if interested {
				let _ = session.outbound.send(raw_line.to_string());
			}
		}
	}

	/// Never blocks the reader: a full channel drops the notification.
	fn publish(&self, notification: ElectrumNotification) {
		let guard = self.notifications();
		let Some(sender) = guard.as_ref() else {
			return;
		};
		match sender.try_send(notification) {
			Ok(()) => {}
			Err(mpsc::error::TrySendError::Full(dropped)) => {
				warn!("Notification channel full, dropping {:?}", dropped);
			}
			Err(mpsc::error::TrySendError::Closed(_)) => {
				debug!("Notification receiver gone");
			}
		}
	}

	fn reply_local(&self, session_id: u64, batch: Option<BatchSlot>, response: Response) {
		let line = match batch {
			Some(slot) => {
				let value = match serde_json::to_value(&response) {
					Ok(value) => value,
					Err(e) => {
						error!("Failed to encode batch member: {}", e);
						return;
					}
				};
				match slot.collector.fill(slot.index, value) {
					Some(complete) => complete.to_string(),
					None => return,
				}
			}
			None => match serde_json::to_string(&response) {
				Ok(line) => line,
				Err(e) => {
					error!("Failed to encode response: {}", e);
					return;
				}
			},
		};

		match self.sessions().get(&session_id) {
			Some(session) => {
				let _ = session.outbound.send(line);
			}
			None => debug!("Session {} closed before its reply arrived", session_id),
		}
	}

	fn fail_pending(&self, pending: PendingRequest, err: ProxyError) {
		match pending.origin {
			Origin::Local {
				session_id,
				original_id,
				batch,
			} => {
				let reply = Response::failure(original_id, INTERNAL_ERROR, err.to_string());
				self.reply_local(session_id, batch, reply);
			}
			Origin::Internal(tx) => {
				let _ = tx.send(Err(err));
			}
		}
	}

	/// Tear everything down. Safe to call any number of times.
	fn stop(&self, connection_lost: bool) {
		if self.stopped.swap(true, Ordering::SeqCst) {
			return;
		}

		self.shutdown.cancel();
		self.notifications().take();
		let sessions = std::mem::take(&mut *self.sessions());

		for pending in self.router.drain() {
			let err = if connection_lost {
				ProxyError::ConnectionLost
			} else {
				ProxyError::NotRunning
			};
			self.fail_pending(pending, err);
		}

		if connection_lost {
			error!(
				"Upstream {}:{} lost, proxy stopped ({} local sessions closed)",
				self.config.host,
				self.config.port,
				sessions.len()
			);
		} else {
			info!("Proxy stopped ({} local sessions closed)", sessions.len());
		}
	}

	fn server_version(&self) -> Option<Value> {
		self.state().server_version.clone()
	}

	fn state(&self) -> MutexGuard<'_, ProxyState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn sessions(&self) -> MutexGuard<'_, HashMap<u64, SessionHandle>> {
		self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn notifications(&self) -> MutexGuard<'_, Option<mpsc::Sender<ElectrumNotification>>> {
		self.notifications
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
	}
}

async fn read_upstream<R>(shared: Arc<ProxyShared>, reader: R)
where
	R: AsyncRead + Unpin,
{
	let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
	loop {
		tokio::select! {
			_ = shared.shutdown.cancelled() => return,
			next = lines.next() => match next {
				Some(Ok(line)) => shared.handle_upstream_line(&line).await,
				Some(Err(e)) => {
					warn!("Upstream read failed: {}", e);
					break;
				}
				None => {
					warn!("Upstream closed the connection");
					break;
				}
			}
		}
	}
	shared.stop(true);
}

async fn accept_loop(shared: Arc<ProxyShared>, listener: TcpListener) {
	loop {
		tokio::select! {
			_ = shared.shutdown.cancelled() => break,
			accepted = listener.accept() => match accepted {
				Ok((stream, peer)) => {
					let session_id = shared.next_session_id.fetch_add(1, Ordering::Relaxed);
					debug!("Local session {} opened from {}", session_id, peer);
					tokio::spawn(serve_session(shared.clone(), session_id, stream));
				}
				Err(e) => warn!("Failed to accept local connection: {}", e),
			}
		}
	}
	debug!("Local listener closed");
}

/// Handle to a running caching proxy. Cheap to clone; all clones control the same proxy.
#[derive(Clone)]
pub struct CachingProxy {
	shared: Arc<ProxyShared>,
	local_addr: SocketAddr,
	notifications: Arc<Mutex<Option<mpsc::Receiver<ElectrumNotification>>>>,
}

impl CachingProxy {
	/// Connect and verify the upstream, then start serving on an ephemeral loopback port.
	///
	/// Fails with `ProxyError::Trust` if the server certificate needs an approval
	/// decision.
	pub async fn start(
		config: ProxyConfig,
		cache: Arc<PersistentCache>,
		trust: &TrustStore,
	) -> Result<Self, ProxyError> {
		let upstream = verify_upstream(&config, trust).await?;
		Self::start_with_upstream(config, cache, upstream).await
	}

	/// Start on an upstream connection that was already verified.
	pub async fn start_with_upstream(
		config: ProxyConfig,
		cache: Arc<PersistentCache>,
		upstream: VerifiedUpstream,
	) -> Result<Self, ProxyError> {
		let (read_half, write_half) = tokio::io::split(upstream.stream);
		let (upstream_tx, upstream_rx) = mpsc::unbounded_channel();
		let (notify_tx, notify_rx) = mpsc::channel(config.notification_capacity.max(1));
		let shutdown = CancellationToken::new();

		let shared = Arc::new(ProxyShared {
			config,
			cache,
			router: RequestRouter::new(),
			upstream: upstream_tx,
			sessions: Mutex::new(HashMap::new()),
			state: Mutex::new(ProxyState::default()),
			notifications: Mutex::new(Some(notify_tx)),
			shutdown: shutdown.clone(),
			stopped: AtomicBool::new(false),
			next_session_id: AtomicU64::new(1),
		});

		tokio::spawn(write_lines(write_half, upstream_rx, shutdown));
		tokio::spawn(read_upstream(shared.clone(), read_half));

		let version = match shared
			.request(
				methods::SERVER_VERSION,
				vec![json!(CLIENT_NAME), json!(PROTOCOL_VERSION)],
			)
			.await
		{
			Ok(version) => version,
			Err(e) => {
				shared.stop(false);
				return Err(e);
			}
		};
		debug!("Negotiated server version {}", version);

		let listener = match TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await {
			Ok(listener) => listener,
			Err(e) => {
				shared.stop(false);
				return Err(e.into());
			}
		};
		let local_addr = listener.local_addr()?;
		tokio::spawn(accept_loop(shared.clone(), listener));
		spawn_background_tasks(&shared);

		info!(
			"Proxy for {}:{} listening on {}",
			upstream.host, upstream.port, local_addr
		);

		Ok(Self {
			shared,
			local_addr,
			notifications: Arc::new(Mutex::new(Some(notify_rx))),
		})
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	/// Loopback port local clients connect to.
	pub fn local_port(&self) -> u16 {
		self.local_addr.port()
	}

	/// The notification stream. Only the first call returns it; the stream ends when the
	/// proxy stops or loses its upstream.
	pub fn take_notifications(&self) -> Option<mpsc::Receiver<ElectrumNotification>> {
		self.notifications
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take()
	}

	/// Stop serving. Idempotent; pending requests fail and the notification stream ends.
	pub fn stop(&self) {
		self.shared.stop(false);
	}

	pub fn is_running(&self) -> bool {
		!self.shared.stopped.load(Ordering::SeqCst)
	}

	/// The `server.version` reply negotiated at startup.
	pub fn server_version(&self) -> Option<Value> {
		self.shared.server_version()
	}

	pub async fn ping(&self) -> Result<(), ProxyError> {
		self.shared.request(methods::SERVER_PING, vec![]).await?;
		Ok(())
	}

	pub async fn server_features(&self) -> Result<Value, ProxyError> {
		self.shared.request(methods::SERVER_FEATURES, vec![]).await
	}

	/// Fee rate estimate in BTC/kvB for confirmation within `target_blocks`.
	pub async fn estimate_fee(&self, target_blocks: u32) -> Result<f64, ProxyError> {
		let result = self
			.shared
			.request(methods::ESTIMATE_FEE, vec![json!(target_blocks)])
			.await?;
		result.as_f64().ok_or_else(|| unexpected(methods::ESTIMATE_FEE, &result))
	}

	/// Minimum relay fee reported by the server, once the background query completed.
	pub fn relay_fee(&self) -> Option<f64> {
		self.shared.state().relay_fee
	}

	/// Broadcast a raw transaction, returning its txid.
	pub async fn broadcast(&self, raw_hex: &str) -> Result<String, ProxyError> {
		let result = self
			.shared
			.request(methods::TRANSACTION_BROADCAST, vec![json!(raw_hex)])
			.await?;
		result
			.as_str()
			.map(str::to_string)
			.ok_or_else(|| unexpected(methods::TRANSACTION_BROADCAST, &result))
	}

	/// Raw transaction hex, served from the cache when confirmed.
	pub async fn get_transaction(&self, txid: &str) -> Result<String, ProxyError> {
		if let Some(entry) = self.shared.cache.get_entry(txid).await {
			if entry.is_confirmed {
				return Ok(entry.raw_hex);
			}
		}
		let result = self
			.shared
			.request(methods::TRANSACTION_GET, vec![json!(txid)])
			.await?;
		result
			.as_str()
			.map(str::to_string)
			.ok_or_else(|| unexpected(methods::TRANSACTION_GET, &result))
	}

	/// Verbose transaction query. Always goes upstream; a confirmed result is cached.
	pub async fn get_transaction_verbose(&self, txid: &str) -> Result<Value, ProxyError> {
		self.shared
			.request(methods::TRANSACTION_GET, vec![json!(txid), json!(true)])
			.await
	}

	/// Subscribe to chain tips and to every given script hash, returning their statuses.
	pub async fn start_subscriptions(&self, script_hashes: &[String]) -> Result<StatusMap, ProxyError> {
		let headers = self.shared.dispatch(methods::HEADERS_SUBSCRIBE, vec![])?;
		let statuses = self.subscribe_pipelined(script_hashes).await;
		let header = self.shared.await_reply(headers).await?;
		let statuses = statuses?;

		info!(
			"Subscribed to {} script hashes at tip {:?}",
			statuses.len(),
			header_height(&header)
		);
		Ok(statuses)
	}

	/// Subscribe to the script hashes not yet subscribed on this connection.
	pub async fn subscribe_additional_script_hashes(
		&self,
		script_hashes: &[String],
	) -> Result<StatusMap, ProxyError> {
		let fresh: Vec<String> = {
			let state = self.shared.state();
			script_hashes
				.iter()
				.filter(|sh| !state.subscribed.contains(*sh))
				.cloned()
				.collect()
		};
		if fresh.is_empty() {
			return Ok(StatusMap::new());
		}
		debug!("Subscribing to {} additional script hashes", fresh.len());
		self.subscribe_pipelined(&fresh).await
	}

	/// Current statuses for the given script hashes, fetched from the server.
	pub async fn fetch_statuses(&self, script_hashes: &[String]) -> Result<StatusMap, ProxyError> {
		self.subscribe_pipelined(script_hashes).await
	}

	/// Script hashes from `known` whose live status differs from the known one.
	pub fn check_for_script_hash_changes(&self, known: &StatusMap) -> Vec<String> {
		let state = self.shared.state();
		known
			.iter()
			.filter(|(sh, status)| state.live_statuses.get(*sh).is_some_and(|live| live != *status))
			.map(|(sh, _)| sh.clone())
			.collect()
	}

	/// Statuses of every subscribed script hash, kept current by pushes.
	pub fn live_statuses(&self) -> StatusMap {
		self.shared.state().live_statuses.clone()
	}

	pub fn subscribed_script_hashes(&self) -> BTreeSet<String> {
		self.shared.state().subscribed.clone()
	}

	/// Latest chain tip height seen on the connection.
	pub fn tip_height(&self) -> Option<u32> {
		self.shared.state().tip_height
	}

	/// Fetch every uncached transaction concurrently, warming the cache. Returns how many
	/// were fetched.
	pub async fn pipeline_fetch_transactions(&self, txids: &[String]) -> Result<usize, ProxyError> {
		let mut missing = Vec::new();
		for txid in txids {
			if !self.shared.cache.contains(txid).await {
				missing.push(txid);
			}
		}
		if missing.is_empty() {
			return Ok(0);
		}

		let inflight = missing
			.iter()
			.map(|txid| self.shared.dispatch(methods::TRANSACTION_GET, vec![json!(txid)]))
			.collect::<Result<Vec<_>, _>>()?;
		let results = join_all(inflight.into_iter().map(|i| self.shared.await_reply(i))).await;

		let fetched = results.iter().filter(|r| r.is_ok()).count();
		if fetched < missing.len() {
			warn!(
				"Prefetched {} of {} transactions",
				fetched,
				missing.len()
			);
		} else {
			debug!("Prefetched {} transactions", fetched);
		}
		Ok(fetched)
	}

	async fn subscribe_pipelined(&self, script_hashes: &[String]) -> Result<StatusMap, ProxyError> {
		let mut inflight = Vec::with_capacity(script_hashes.len());
		for script_hash in script_hashes {
			let request = self
				.shared
				.dispatch(methods::SCRIPTHASH_SUBSCRIBE, vec![json!(script_hash)])?;
			inflight.push((script_hash.clone(), request));
		}

		let shared = &self.shared;
		let replies = join_all(
			inflight
				.into_iter()
				.map(|(sh, request)| async move { (sh, shared.await_reply(request).await) }),
		)
		.await;

		let mut statuses = StatusMap::new();
		for (script_hash, reply) in replies {
			let status = reply?;
			statuses.insert(script_hash, status.as_str().map(str::to_string));
		}
		Ok(statuses)
	}
}

fn spawn_background_tasks(shared: &Arc<ProxyShared>) {
	let relay = shared.clone();
	tokio::spawn(async move {
		match relay.request(methods::RELAY_FEE, vec![]).await {
			Ok(fee) => debug!("Upstream relay fee {}", fee),
			Err(e) => debug!("Relay fee query failed: {}", e),
		}
	});

	let cache = shared.cache.clone();
	let max_age = shared.config.unconfirmed_max_age;
	tokio::spawn(async move {
		cache.prune_stale_unconfirmed(max_age).await;
	});
}

fn unexpected(method: &str, result: &Value) -> ProxyError {
	ElectrumError::UnexpectedResult {
		method: method.to_string(),
		detail: format!("got {}", result),
	}
	.into()
}
