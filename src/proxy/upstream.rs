//! Upstream connection establishment.
//!
//! Dials the Electrum server directly or through a SOCKS5 front-end, wraps the socket in
//! TLS when configured, and runs the trust-on-first-use decision eagerly, before the proxy
//! reports itself started. A `FirstUse` or `Mismatch` decision is returned to the caller as
//! a `TrustViolation` error; the handshake never happens lazily inside the proxy.

use crate::config::ProxyConfig;
use crate::proxy::types::{ProxyError, TrustViolation, VerifiedUpstream};
use crate::trust::TrustStore;

use backoff::{ExponentialBackoff, future::retry};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_native_tls::{TlsConnector, TlsStream, native_tls};
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, info, warn};

/// Dial the upstream and run the certificate decision.
///
/// Returns the live, verified stream so it can be handed to the proxy without a second
/// handshake.
pub async fn verify_upstream(
	config: &ProxyConfig,
	trust: &TrustStore,
) -> Result<VerifiedUpstream, ProxyError> {
	let tcp = dial(config).await?;

	if !config.requires_certificate_check() {
		if config.is_overlay_host() {
			debug!(
				"Overlay address {} without TLS, skipping certificate verification",
				config.host
			);
		} else {
			warn!(
				"Connecting to {}:{} without TLS",
				config.host, config.port
			);
		}
		return Ok(VerifiedUpstream {
			stream: Box::new(tcp),
			host: config.host.clone(),
			port: config.port,
			fingerprint: None,
		});
	}

	let tls = tls_handshake(config, tcp).await?;
	let fingerprint = certificate_fingerprint(&tls)?;
	let fingerprint = check_fingerprint(config, trust, fingerprint).await?;

	Ok(VerifiedUpstream {
		stream: Box::new(tls),
		host: config.host.clone(),
		port: config.port,
		fingerprint: Some(fingerprint),
	})
}

/// Decide whether the certificate with `fingerprint` may be used for the configured
/// endpoint. Anything but a pinned match is a `TrustViolation`.
async fn check_fingerprint(
	config: &ProxyConfig,
	trust: &TrustStore,
	fingerprint: String,
) -> Result<String, ProxyError> {
	let (decision, stored) = trust
		.evaluate(&config.host, config.port, &fingerprint)
		.await?;
	if !decision.is_trusted() {
		return Err(TrustViolation {
			host: config.host.clone(),
			port: config.port,
			decision,
			observed: fingerprint,
			stored,
		}
		.into());
	}

	info!(
		"Verified certificate {} for {}:{}",
		fingerprint, config.host, config.port
	);
	Ok(fingerprint)
}

/// Like `verify_upstream`, retrying transient transport failures with exponential backoff
/// for up to `max_elapsed`. Trust and protocol failures are returned immediately.
pub async fn establish_upstream(
	config: &ProxyConfig,
	trust: &TrustStore,
	max_elapsed: Duration,
) -> Result<VerifiedUpstream, ProxyError> {
	let policy = ExponentialBackoff {
		max_elapsed_time: Some(max_elapsed),
		..ExponentialBackoff::default()
	};

	retry(policy, || async {
		verify_upstream(config, trust).await.map_err(retry_class)
	})
	.await
}

/// Transport failures are retried; trust and protocol failures end the attempt.
fn retry_class(e: ProxyError) -> backoff::Error<ProxyError> {
	if e.is_transport() {
		warn!("Upstream connection attempt failed: {}", e);
		backoff::Error::transient(e)
	} else {
		backoff::Error::permanent(e)
	}
}

/// Open the TCP connection, through the SOCKS5 front-end when one is configured.
async fn dial(config: &ProxyConfig) -> Result<TcpStream, ProxyError> {
	let connect = async {
		match config.socks_proxy {
			Some(socks) => {
				debug!(
					"Dialing {}:{} through SOCKS5 proxy {}",
					config.host, config.port, socks
				);
				let stream =
					Socks5Stream::connect(socks, (config.host.as_str(), config.port)).await?;
				Ok(stream.into_inner())
			}
			None => {
				debug!("Dialing {}:{}", config.host, config.port);
				Ok(TcpStream::connect((config.host.as_str(), config.port)).await?)
			}
		}
	};

	timeout(config.connect_timeout, connect)
		.await
		.map_err(|_| ProxyError::Timeout("connect"))?
}

/// TLS handshake that accepts any certificate; trust is decided by the pinned fingerprint.
async fn tls_handshake(
	config: &ProxyConfig,
	tcp: TcpStream,
) -> Result<TlsStream<TcpStream>, ProxyError> {
	let connector = native_tls::TlsConnector::builder()
		.danger_accept_invalid_certs(true)
		.danger_accept_invalid_hostnames(true)
		.build()?;
	let connector = TlsConnector::from(connector);

	let stream = timeout(config.connect_timeout, connector.connect(&config.host, tcp))
		.await
		.map_err(|_| ProxyError::Timeout("TLS handshake"))??;
	Ok(stream)
}

fn certificate_fingerprint(stream: &TlsStream<TcpStream>) -> Result<String, ProxyError> {
	let certificate = stream
		.get_ref()
		.peer_certificate()?
		.ok_or(ProxyError::MissingCertificate)?;
	Ok(sha256_fingerprint(&certificate.to_der()?))
}

/// Lowercase hex SHA-256 of a DER-encoded certificate.
pub fn sha256_fingerprint(der: &[u8]) -> String {
	hex::encode(Sha256::digest(der))
}
