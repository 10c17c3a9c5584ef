//! Local per-transaction view kept in step with the wallet engine.

use crate::wallet::types::{TxDetails, WalletEvent};

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// How the ledger was refreshed after a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerRefresh {
	/// Only the named transactions were recomputed
	Incremental(usize),
	/// The whole ledger was rebuilt from the engine
	Rebuilt(usize),
}

/// Transaction list and balance derived from the engine
#[derive(Debug, Default)]
pub struct TransactionLedger {
	transactions: HashMap<String, TxDetails>,
}

impl TransactionLedger {
	/// Replace the ledger with the engine's full transaction list.
	pub fn rebuild(&mut self, transactions: Vec<TxDetails>) -> usize {
		self.transactions = transactions
			.into_iter()
			.map(|tx| (tx.txid.clone(), tx))
			.collect();
		self.transactions.len()
	}

	/// Recompute only the transactions named by `events`, or rebuild everything when more
	/// than `threshold` are affected.
	pub fn refresh<L, A>(
		&mut self,
		events: &[WalletEvent],
		threshold: usize,
		lookup: L,
		all: A,
	) -> LedgerRefresh
	where
		L: Fn(&str) -> Option<TxDetails>,
		A: FnOnce() -> Vec<TxDetails>,
	{
		let affected: BTreeSet<&str> = events.iter().flat_map(WalletEvent::affected_txids).collect();

		if affected.len() > threshold {
			debug!(
				"{} transactions affected, rebuilding ledger",
				affected.len()
			);
			return LedgerRefresh::Rebuilt(self.rebuild(all()));
		}

		for txid in &affected {
			match lookup(txid) {
				Some(tx) => {
					self.transactions.insert(tx.txid.clone(), tx);
				}
				None => {
					self.transactions.remove(*txid);
				}
			}
		}
		LedgerRefresh::Incremental(affected.len())
	}

	/// Transactions ordered with unconfirmed first, then by descending height.
	pub fn transactions(&self) -> Vec<TxDetails> {
		let mut txs: Vec<TxDetails> = self.transactions.values().cloned().collect();
		txs.sort_by(|a, b| {
			let key = |tx: &TxDetails| tx.confirmation_height.unwrap_or(u32::MAX);
			key(b).cmp(&key(a)).then_with(|| a.txid.cmp(&b.txid))
		});
		txs
	}

	pub fn balance(&self) -> i64 {
		self.transactions.values().map(|tx| tx.net_value).sum()
	}

	pub fn len(&self) -> usize {
		self.transactions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.transactions.is_empty()
	}
}
