//! Debounced handling of the proxy's notification stream.
//!
//! Every notification joins a pending batch and restarts the quiet-period timer. Block
//! heights are applied to the chain tip immediately. When the timer fires the batch is
//! drained and exactly one quick sync runs for it on a separate task, so the stream keeps
//! being consumed while the wallet syncs. A batch whose sync was skipped or failed with a
//! retryable error comes back and is retried after the next quiet period.

use crate::electrum::ElectrumNotification;
use crate::wallet::engine::WalletEngine;
use crate::wallet::sync::coordinator::SyncCoordinator;
use crate::wallet::types::SyncOutcome;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

pub struct NotificationListener<E: WalletEngine + 'static> {
	coordinator: Arc<SyncCoordinator<E>>,
	debounce: Duration,
}

impl<E: WalletEngine + 'static> NotificationListener<E> {
	pub fn new(coordinator: Arc<SyncCoordinator<E>>) -> Self {
		let debounce = coordinator.config().debounce_interval;
		Self {
			coordinator,
			debounce,
		}
	}

	/// Consume `notifications` on a background task until the stream ends.
	pub fn spawn(
		coordinator: Arc<SyncCoordinator<E>>,
		notifications: mpsc::Receiver<ElectrumNotification>,
	) -> JoinHandle<()> {
		tokio::spawn(Self::new(coordinator).run(notifications))
	}

	pub async fn run(self, mut notifications: mpsc::Receiver<ElectrumNotification>) {
		let (requeue_tx, mut requeue_rx) = mpsc::unbounded_channel();
		let mut pending: Vec<ElectrumNotification> = Vec::new();
		let quiet = tokio::time::sleep(self.debounce);
		tokio::pin!(quiet);
		let mut armed = false;

		loop {
			tokio::select! {
				next = notifications.recv() => {
					let Some(notification) = next else { break };
					if let ElectrumNotification::NewBlockHeader { height } = notification {
						self.coordinator.observe_tip(height);
					}
					pending.push(notification);
					quiet.as_mut().reset(Instant::now() + self.debounce);
					armed = true;
				}
				Some(batch) = requeue_rx.recv() => {
					let newer = std::mem::replace(&mut pending, batch);
					pending.extend(newer);
					quiet.as_mut().reset(Instant::now() + self.debounce);
					armed = true;
				}
				_ = &mut quiet, if armed => {
					armed = false;
					let batch = std::mem::take(&mut pending);
					if !batch.is_empty() {
						tokio::spawn(flush(self.coordinator.clone(), batch, requeue_tx.clone()));
					}
				}
			}
		}
		debug!("Notification stream ended");
	}
}

/// Run one quick sync for `batch`, handing it back through `requeue` if it must be retried.
async fn flush<E: WalletEngine + 'static>(
	coordinator: Arc<SyncCoordinator<E>>,
	batch: Vec<ElectrumNotification>,
	requeue: mpsc::UnboundedSender<Vec<ElectrumNotification>>,
) {
	match coordinator.handle_notification_batch(&batch).await {
		Ok(SyncOutcome::AlreadyRunning) => {
			debug!(
				"Sync in progress, requeueing {} notifications",
				batch.len()
			);
			let _ = requeue.send(batch);
		}
		Ok(SyncOutcome::Synced { events }) => {
			debug!("Triggered sync applied {} wallet events", events.len());
		}
		Ok(SyncOutcome::NoChanges) => debug!("Triggered sync found no changes"),
		Err(e) if e.is_retryable() => {
			warn!("Triggered sync failed, retrying {} notifications: {}", batch.len(), e);
			let _ = requeue.send(batch);
		}
		Err(e) => error!("Triggered sync failed: {}", e),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::SyncConfig;
	use crate::wallet::sync::test_support::{MockBackend, MockEngine, coordinator};
	use std::sync::atomic::Ordering;

	fn changed(i: usize) -> ElectrumNotification {
		ElectrumNotification::ScriptHashChanged {
			script_hash: format!("{:064x}", i),
			new_status: Some(format!("s{}", i)),
		}
	}

	#[tokio::test(start_paused = true)]
	async fn burst_triggers_one_sync_after_quiet_period() {
		let dir = tempfile::tempdir().unwrap();
		let engine = Arc::new(MockEngine::new(100));
		let backend = Arc::new(MockBackend::default());
		let (coordinator, _cache) =
			coordinator(engine.clone(), backend, SyncConfig::default(), &dir).await;
		let coordinator = Arc::new(coordinator);

		let (tx, rx) = mpsc::channel(16);
		let _listener = NotificationListener::spawn(coordinator, rx);

		for i in 0..5 {
			tx.send(changed(i)).await.unwrap();
			tokio::time::sleep(Duration::from_millis(200)).await;
		}
		assert_eq!(engine.syncs.load(Ordering::SeqCst), 0);

		tokio::time::sleep(Duration::from_secs(2)).await;
		assert_eq!(engine.syncs.load(Ordering::SeqCst), 1);

		tokio::time::sleep(Duration::from_secs(5)).await;
		assert_eq!(engine.syncs.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn block_height_applies_before_debounce() {
		let dir = tempfile::tempdir().unwrap();
		let engine = Arc::new(MockEngine::new(100));
		let backend = Arc::new(MockBackend::default());
		let (coordinator, _cache) =
			coordinator(engine.clone(), backend, SyncConfig::default(), &dir).await;
		let coordinator = Arc::new(coordinator);
		let tip = coordinator.chain_tip();

		let (tx, rx) = mpsc::channel(16);
		let _listener = NotificationListener::spawn(coordinator, rx);

		tx.send(ElectrumNotification::NewBlockHeader { height: 150 })
			.await
			.unwrap();
		tokio::time::sleep(Duration::from_millis(10)).await;

		assert_eq!(*tip.borrow(), Some(150));
		assert_eq!(engine.syncs.load(Ordering::SeqCst), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn timed_out_sync_is_retried_without_new_notifications() {
		let dir = tempfile::tempdir().unwrap();
		let engine = Arc::new(MockEngine::new(100));
		engine.set_sync_delay(Duration::from_secs(120));
		let backend = Arc::new(MockBackend::default());
		let (coordinator, _cache) =
			coordinator(engine.clone(), backend, SyncConfig::default(), &dir).await;
		let coordinator = Arc::new(coordinator);

		let (tx, rx) = mpsc::channel(16);
		let _listener = NotificationListener::spawn(coordinator.clone(), rx);
		tx.send(changed(0)).await.unwrap();

		// Debounce fires at 1s and the sync times out at 61s.
		tokio::time::sleep(Duration::from_millis(61_500)).await;
		assert_eq!(engine.syncs.load(Ordering::SeqCst), 1);
		assert_eq!(coordinator.status().batch_size, 250);
		engine.set_sync_delay(Duration::ZERO);

		tokio::time::sleep(Duration::from_secs(5)).await;
		assert_eq!(engine.syncs.load(Ordering::SeqCst), 2);
		assert_eq!(engine.last_batch_size.load(Ordering::SeqCst), 250);
		assert_eq!(coordinator.status().batch_size, 500);
	}
}
