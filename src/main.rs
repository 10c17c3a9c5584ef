use clap::Parser;
use electrum_sync_proxy::cache::PersistentCache;
use electrum_sync_proxy::config::ProxyConfig;
use electrum_sync_proxy::electrum::ElectrumNotification;
use electrum_sync_proxy::proxy::{CachingProxy, ProxyError, VerifiedUpstream, establish_upstream};
use electrum_sync_proxy::trust::{TrustDecision, TrustStore};

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How long transient connection failures are retried at startup
const CONNECT_RETRY_WINDOW: Duration = Duration::from_secs(120);

#[derive(Parser, Debug)]
#[command(
	name = "electrum-sync-proxy",
	version,
	about = "Local caching multiplexing proxy for an Electrum server"
)]
struct Args {
	#[arg(long, env = "ELECTRUM_HOST", default_value = "electrum.blockstream.info")]
	host: String,

	#[arg(long, env = "ELECTRUM_PORT", default_value_t = 50002)]
	port: u16,

	/// Connect without TLS
	#[arg(long)]
	no_tls: bool,

	/// SOCKS5 proxy to dial through, e.g. 127.0.0.1:9050 for Tor
	#[arg(long, env = "ELECTRUM_SOCKS_PROXY")]
	socks: Option<SocketAddr>,

	#[arg(long, env = "ELECTRUM_PROXY_DATA_DIR", default_value = "./data")]
	data_dir: PathBuf,

	#[arg(long, default_value_t = 10)]
	connect_timeout_secs: u64,

	#[arg(long, default_value_t = 30)]
	request_timeout_secs: u64,

	/// Pin the server certificate if it is new or has changed
	#[arg(long)]
	approve: bool,

	/// Script hash to subscribe to and log changes for (repeatable)
	#[arg(long = "watch", value_name = "SCRIPT_HASH")]
	watch: Vec<String>,
}

impl Args {
	fn proxy_config(&self) -> ProxyConfig {
		ProxyConfig {
			host: self.host.clone(),
			port: self.port,
			use_tls: !self.no_tls,
			socks_proxy: self.socks,
			connect_timeout: Duration::from_secs(self.connect_timeout_secs),
			request_timeout: Duration::from_secs(self.request_timeout_secs),
			data_dir: self.data_dir.clone(),
			..ProxyConfig::default()
		}
	}
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let args = Args::parse();
	let config = args.proxy_config();

	if let Err(e) = run(config, args.approve, args.watch).await {
		error!("Proxy failed: {}", e);
		std::process::exit(1);
	}
}

async fn run(config: ProxyConfig, approve: bool, watch: Vec<String>) -> Result<(), ProxyError> {
	info!("Starting Electrum proxy for {}:{}", config.host, config.port);

	let trust = TrustStore::new(config.data_dir.clone());
	let upstream = connect(&config, &trust, approve).await?;

	let cache = Arc::new(PersistentCache::open(config.data_dir.clone()).await);
	let proxy = CachingProxy::start_with_upstream(config, cache.clone(), upstream).await?;
	let Some(mut notifications) = proxy.take_notifications() else {
		return Err(ProxyError::NotRunning);
	};

	if !watch.is_empty() {
		let statuses = proxy.start_subscriptions(&watch).await?;
		for (script_hash, status) in &statuses {
			info!("Watching {} (status {:?})", script_hash, status);
		}
	}

	info!(
		"Local clients can connect to 127.0.0.1:{}",
		proxy.local_port()
	);

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {
				info!("Shutting down");
				break;
			}
			next = notifications.recv() => match next {
				Some(ElectrumNotification::NewBlockHeader { height }) => {
					info!("New block at height {}", height);
				}
				Some(ElectrumNotification::ScriptHashChanged { script_hash, new_status }) => {
					info!("Script hash {} changed, status {:?}", script_hash, new_status);
				}
				None => {
					proxy.stop();
					cache.flush().await;
					return Err(ProxyError::ConnectionLost);
				}
			}
		}
	}

	proxy.stop();
	cache.flush().await;
	Ok(())
}

/// Connect with retries, pinning the certificate when `approve` is set.
async fn connect(
	config: &ProxyConfig,
	trust: &TrustStore,
	approve: bool,
) -> Result<VerifiedUpstream, ProxyError> {
	let violation = match establish_upstream(config, trust, CONNECT_RETRY_WINDOW).await {
		Err(ProxyError::Trust(violation)) => violation,
		other => return other,
	};

	match violation.decision {
		TrustDecision::Mismatch => error!(
			"Certificate for {}:{} changed: pinned {}, presented {}",
			violation.host,
			violation.port,
			violation.stored.as_deref().unwrap_or("none"),
			violation.observed
		),
		_ => warn!(
			"First connection to {}:{}, certificate fingerprint {}",
			violation.host, violation.port, violation.observed
		),
	}

	if !approve {
		error!("Re-run with --approve to pin this certificate");
		return Err(violation.into());
	}

	trust
		.approve(&violation.host, violation.port, &violation.observed)
		.await?;
	establish_upstream(config, trust, CONNECT_RETRY_WINDOW).await
}
