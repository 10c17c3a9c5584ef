//! Request id rewriting and response routing.
//!
//! Every request sent upstream carries a process-unique id. The router remembers, per
//! upstream id, who asked and under which id, so the response can be routed back with the
//! caller's original id restored.

use crate::electrum::Request;
use crate::proxy::types::ProxyError;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Who is waiting for a response.
pub(crate) enum Origin {
	/// A local client connection.
	Local {
		session_id: u64,
		original_id: Value,
		batch: Option<BatchSlot>,
	},
	/// A request issued by the proxy itself on behalf of the library API.
	Internal(oneshot::Sender<Result<Value, ProxyError>>),
}

/// Position of one request inside a local JSON-RPC batch.
#[derive(Clone)]
pub(crate) struct BatchSlot {
	pub collector: Arc<BatchCollector>,
	pub index: usize,
}

pub(crate) struct PendingRequest {
	pub origin: Origin,
	/// The request as the caller sent it, kept for response post-processing.
	pub request: Request,
}

pub(crate) struct RequestRouter {
	next_id: AtomicU64,
	pending: Mutex<HashMap<u64, PendingRequest>>,
}

impl RequestRouter {
	pub fn new() -> Self {
		Self {
			next_id: AtomicU64::new(1),
			pending: Mutex::new(HashMap::new()),
		}
	}

	/// Reserve the next upstream id. Ids are never reused within a process.
	pub fn next_id(&self) -> u64 {
		self.next_id.fetch_add(1, Ordering::Relaxed)
	}

	/// Record a request that is about to be written upstream under `id`.
	pub fn register(&self, id: u64, pending: PendingRequest) {
		self.lock().insert(id, pending);
	}

	/// Remove and return the request waiting on `id`.
	pub fn complete(&self, id: u64) -> Option<PendingRequest> {
		self.lock().remove(&id)
	}

	/// Forget every request from a local session that went away. Their responses are
	/// discarded when they arrive.
	pub fn forget_session(&self, session_id: u64) -> usize {
		let mut pending = self.lock();
		let before = pending.len();
		pending.retain(|_, p| {
			!matches!(p.origin, Origin::Local { session_id: sid, .. } if sid == session_id)
		});
		before - pending.len()
	}

	/// Remove every outstanding request.
	pub fn drain(&self) -> Vec<PendingRequest> {
		self.lock().drain().map(|(_, p)| p).collect()
	}

	pub fn len(&self) -> usize {
		self.lock().len()
	}

	fn lock(&self) -> MutexGuard<'_, HashMap<u64, PendingRequest>> {
		self.pending.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

/// Collects the responses of a local batch until every member has answered.
pub(crate) struct BatchCollector {
	slots: Mutex<(Vec<Option<Value>>, usize)>,
}

impl BatchCollector {
	pub fn new(len: usize) -> Self {
		Self {
			slots: Mutex::new((vec![None; len], len)),
		}
	}

	/// Fill one slot. Returns the complete response array once the last slot is filled.
	pub fn fill(&self, index: usize, response: Value) -> Option<Value> {
		let mut guard = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
		let (slots, remaining) = &mut *guard;

		let slot = slots.get_mut(index)?;
		if slot.is_some() {
			return None;
		}
		*slot = Some(response);
		*remaining -= 1;

		if *remaining > 0 {
			return None;
		}
		Some(Value::Array(
			slots.iter_mut().filter_map(Option::take).collect(),
		))
	}
}
