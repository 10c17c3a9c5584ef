//! Electrum wire protocol module
//!
//! This module provides the message types spoken on both sides of the proxy: JSON-RPC
//! requests and responses, unsolicited subscription pushes, and the notifications the proxy
//! republishes to the sync coordinator. It also derives script hashes, the key every
//! subscription and status snapshot is indexed by.

/// Script hash derivation and txid helpers
mod script_hash;
/// Type definitions for protocol messages
mod types;

pub use script_hash::{is_txid, script_hash};
pub use types::*;
