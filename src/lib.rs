pub mod config;
pub mod core;
pub mod db;
pub mod logging;
pub mod notify;
pub mod snapshot;
pub mod source;
pub mod storage;

pub use crate::config::{AppConfig, StorageConfig, StorageType, SyncConfig};
pub use crate::core::{MirrorEngine, MirrorError, MirrorTarget, RunResult, RunStatus};
pub use crate::db::RunHistory;
