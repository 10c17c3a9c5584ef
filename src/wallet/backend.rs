use crate::electrum::StatusMap;
use crate::proxy::{CachingProxy, ProxyError};

/// The slice of the proxy API the sync coordinator depends on
#[async_trait::async_trait]
pub trait ElectrumBackend: Send + Sync {
	async fn ping(&self) -> Result<(), ProxyError>;

	/// Current statuses of the given script hashes, fetched from the server
	async fn fetch_statuses(&self, script_hashes: &[String]) -> Result<StatusMap, ProxyError>;

	/// Subscribe to headers and to every given script hash
	async fn start_subscriptions(&self, script_hashes: &[String]) -> Result<StatusMap, ProxyError>;

	/// Subscribe to the given script hashes that are not yet subscribed
	async fn subscribe_additional_script_hashes(
		&self,
		script_hashes: &[String],
	) -> Result<StatusMap, ProxyError>;

	/// Statuses of subscribed script hashes as kept current by server pushes
	fn live_statuses(&self) -> StatusMap;

	fn tip_height(&self) -> Option<u32>;

	/// Warm the transaction cache, returning how many transactions were fetched
	async fn pipeline_fetch_transactions(&self, txids: &[String]) -> Result<usize, ProxyError>;
}

#[async_trait::async_trait]
impl ElectrumBackend for CachingProxy {
	async fn ping(&self) -> Result<(), ProxyError> {
		CachingProxy::ping(self).await
	}

	async fn fetch_statuses(&self, script_hashes: &[String]) -> Result<StatusMap, ProxyError> {
		CachingProxy::fetch_statuses(self, script_hashes).await
	}

	async fn start_subscriptions(&self, script_hashes: &[String]) -> Result<StatusMap, ProxyError> {
		CachingProxy::start_subscriptions(self, script_hashes).await
	}

	async fn subscribe_additional_script_hashes(
		&self,
		script_hashes: &[String],
	) -> Result<StatusMap, ProxyError> {
		CachingProxy::subscribe_additional_script_hashes(self, script_hashes).await
	}

	fn live_statuses(&self) -> StatusMap {
		CachingProxy::live_statuses(self)
	}

	fn tip_height(&self) -> Option<u32> {
		CachingProxy::tip_height(self)
	}

	async fn pipeline_fetch_transactions(&self, txids: &[String]) -> Result<usize, ProxyError> {
		CachingProxy::pipeline_fetch_transactions(self, txids).await
	}
}
