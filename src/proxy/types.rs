//! Types shared by the proxy components

use crate::electrum::ElectrumError;
use crate::trust::{TrustDecision, TrustError};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_native_tls::native_tls;

/// Byte stream the proxy speaks the wire protocol over: plain TCP, SOCKS-tunnelled TCP or
/// TLS on top of either.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// An upstream connection that already passed the certificate decision.
///
/// Handing one to `CachingProxy::start_with_upstream` avoids a second handshake over slow
/// anonymizing transports.
pub struct VerifiedUpstream {
	pub(crate) stream: BoxedStream,
	pub host: String,
	pub port: u16,
	/// Pinned fingerprint of the server certificate; `None` for plaintext endpoints.
	pub fingerprint: Option<String>,
}

impl std::fmt::Debug for VerifiedUpstream {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("VerifiedUpstream")
			.field("host", &self.host)
			.field("port", &self.port)
			.field("fingerprint", &self.fingerprint)
			.finish()
	}
}

/// A certificate that needs an explicit approval decision before any traffic flows.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Certificate for {host}:{port} is not trusted ({decision:?}); server presented {observed}")]
pub struct TrustViolation {
	pub host: String,
	pub port: u16,
	/// Either `FirstUse` or `Mismatch`.
	pub decision: TrustDecision,
	/// Fingerprint the server presented.
	pub observed: String,
	/// Fingerprint pinned for the endpoint, if any.
	pub stored: Option<String>,
}

/// Error types for proxy operations
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("TLS error: {0}")]
	Tls(#[from] native_tls::Error),

	#[error("SOCKS error: {0}")]
	Socks(#[from] tokio_socks::Error),

	#[error("Timed out during {0}")]
	Timeout(&'static str),

	#[error("Server presented no certificate")]
	MissingCertificate,

	#[error(transparent)]
	Trust(#[from] TrustViolation),

	#[error("Trust store error: {0}")]
	TrustStore(#[from] TrustError),

	#[error("Protocol error: {0}")]
	Protocol(#[from] ElectrumError),

	#[error("Upstream connection lost")]
	ConnectionLost,

	#[error("Proxy is not running")]
	NotRunning,
}

impl ProxyError {
	/// Transport failures are retryable; trust and protocol failures are not.
	pub fn is_transport(&self) -> bool {
		matches!(
			self,
			ProxyError::Io(_)
				| ProxyError::Tls(_)
				| ProxyError::Socks(_)
				| ProxyError::Timeout(_)
				| ProxyError::ConnectionLost
		)
	}

	/// The pending approval decision, if this is a trust failure.
	pub fn trust_violation(&self) -> Option<&TrustViolation> {
		match self {
			ProxyError::Trust(violation) => Some(violation),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classification() {
		assert!(ProxyError::Timeout("connect").is_transport());
		assert!(ProxyError::ConnectionLost.is_transport());

		let trust = ProxyError::from(TrustViolation {
			host: "h".to_string(),
			port: 1,
			decision: TrustDecision::FirstUse,
			observed: "aa".to_string(),
			stored: None,
		});
		assert!(!trust.is_transport());
		assert_eq!(
			trust.trust_violation().map(|v| v.decision),
			Some(TrustDecision::FirstUse)
		);

		let protocol = ProxyError::from(ElectrumError::Malformed("x".to_string()));
		assert!(!protocol.is_transport());
	}
}
