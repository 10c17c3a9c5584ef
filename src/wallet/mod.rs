pub mod backend;
pub mod engine;
pub mod sync;
pub mod types;

pub use backend::ElectrumBackend;
pub use engine::{EngineError, WalletEngine};
pub use sync::{NotificationListener, SyncCoordinator};
pub use types::*;
