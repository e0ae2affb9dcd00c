pub mod config;
pub mod controller;
pub mod error;
pub mod status;
pub mod store;

pub use config::{MissingPolicy, RollbackPolicy, SyncConfig};
pub use controller::{OpReport, Refresh, SyncController};
pub use error::EngineError;
pub use status::{OpKind, OpRecord, OpStatus, StatusTracker};
pub use store::{EntityStore, Removed};
