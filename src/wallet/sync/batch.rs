use crate::config::SyncConfig;
use tracing::debug;

/// Batch size for revealed-address syncs that shrinks on timeouts.
///
/// Bounded to `[min, default]`: halved on every timeout with a floor at `min`, reset to
/// `default` after a successful sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveBatchSize {
	current: usize,
	min: usize,
	default: usize,
}

impl AdaptiveBatchSize {
	/// Start from a persisted size if there is one, clamped into the configured bounds.
	pub fn new(config: &SyncConfig, persisted: Option<usize>) -> Self {
		let default = config.default_batch_size.max(config.min_batch_size);
		Self {
			current: config.clamp_batch_size(persisted.unwrap_or(default)),
			min: config.min_batch_size,
			default,
		}
	}

	pub fn current(&self) -> usize {
		self.current
	}

	/// Halve after a timeout. Returns the new size.
	pub fn on_timeout(&mut self) -> usize {
		self.current = (self.current / 2).max(self.min);
		debug!("Batch size reduced to {}", self.current);
		self.current
	}

	/// Reset after a success. Returns whether the size changed.
	pub fn on_success(&mut self) -> bool {
		let changed = self.current != self.default;
		self.current = self.default;
		changed
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn halves_on_timeout_and_resets_on_success() {
		let config = SyncConfig::default();
		let mut batch = AdaptiveBatchSize::new(&config, None);
		assert_eq!(batch.current(), 500);

		assert_eq!(batch.on_timeout(), 250);
		assert!(batch.on_success());
		assert_eq!(batch.current(), 500);
		assert!(!batch.on_success());
	}

	#[test]
	fn never_leaves_bounds() {
		let config = SyncConfig::default();
		let mut batch = AdaptiveBatchSize::new(&config, Some(10_000));
		assert_eq!(batch.current(), 500);

		for _ in 0..20 {
			batch.on_timeout();
			assert!(batch.current() >= config.min_batch_size);
		}
		assert_eq!(batch.current(), config.min_batch_size);

		let restored = AdaptiveBatchSize::new(&config, Some(3));
		assert_eq!(restored.current(), config.min_batch_size);
	}
}
