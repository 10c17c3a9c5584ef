//! Configuration for the caching proxy and the sync coordinator.
//!
//! Both structs carry sensible defaults; the binary overrides the proxy settings from its
//! command line and the library user constructs them directly.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Connection and cache settings for the caching multiplexing proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
	/// Upstream Electrum server host name or overlay address.
	pub host: String,
	/// Upstream Electrum server port.
	pub port: u16,
	/// Wrap the upstream connection in TLS (certificate pinned on first use).
	pub use_tls: bool,
	/// SOCKS5 front-end to dial the upstream through, for anonymizing transports.
	pub socks_proxy: Option<SocketAddr>,
	/// Bound on TCP connect, SOCKS negotiation and TLS handshake, each.
	pub connect_timeout: Duration,
	/// Bound on a single request issued by the proxy itself.
	pub request_timeout: Duration,
	/// Directory holding the certificate table, transaction cache and snapshots.
	pub data_dir: PathBuf,
	/// Age after which unconfirmed cache entries are pruned.
	pub unconfirmed_max_age: Duration,
	/// Capacity of the internal notification channel.
	pub notification_capacity: usize,
}

impl Default for ProxyConfig {
	fn default() -> Self {
		Self {
			host: "electrum.blockstream.info".to_string(),
			port: 50002,
			use_tls: true,
			socks_proxy: None,
			connect_timeout: Duration::from_secs(10),
			request_timeout: Duration::from_secs(30),
			data_dir: PathBuf::from("./data"),
			unconfirmed_max_age: Duration::from_secs(14 * 24 * 60 * 60),
			notification_capacity: 256,
		}
	}
}

impl ProxyConfig {
	/// Whether the host is an anonymous overlay address, which the overlay network
	/// itself authenticates.
	pub fn is_overlay_host(&self) -> bool {
		self.host.to_ascii_lowercase().ends_with(".onion")
	}

	/// Whether certificate verification applies to this endpoint.
	///
	/// Overlay addresses without TLS bypass it; overlay addresses with TLS do not.
	pub fn requires_certificate_check(&self) -> bool {
		self.use_tls
	}
}

/// Tuning for the sync coordinator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
	/// Floor for the adaptive batch size.
	pub min_batch_size: usize,
	/// Batch size used after a successful sync, and the ceiling for the adaptive size.
	pub default_batch_size: usize,
	/// Batch size handed to the gap-limit discovery scan.
	pub full_scan_batch_size: usize,
	/// Consecutive unused addresses scanned before discovery stops.
	pub stop_gap: usize,
	/// Wall-clock bound on the quick-sync engine call.
	pub quick_sync_timeout: Duration,
	/// Quiet period after the last notification before a sync is triggered.
	pub debounce_interval: Duration,
	/// Above this many affected transactions the local state is rebuilt from scratch.
	pub incremental_threshold: usize,
	/// Number of most recently revealed addresses per keychain in the sampled snapshot.
	pub sample_size: usize,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			min_batch_size: 25,
			default_batch_size: 500,
			full_scan_batch_size: 500,
			stop_gap: 20,
			quick_sync_timeout: Duration::from_secs(60),
			debounce_interval: Duration::from_secs(1),
			incremental_threshold: 20,
			sample_size: 10,
		}
	}
}

impl SyncConfig {
	/// Clamp a (possibly persisted) batch size into `[min_batch_size, default_batch_size]`.
	pub fn clamp_batch_size(&self, size: usize) -> usize {
		size.clamp(self.min_batch_size, self.default_batch_size.max(self.min_batch_size))
	}
}
