//! Caching multiplexing proxy for the Electrum protocol, with trust-on-first-use certificate
//! pinning, a persistent transaction cache and an adaptive wallet sync coordinator.

pub mod cache;
pub mod config;
pub mod electrum;
pub mod proxy;
pub mod trust;
pub mod utils;
pub mod wallet;
