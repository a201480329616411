pub mod detector;
pub mod engine;
pub mod error;
pub mod lister;
pub mod reconciler;
pub mod retry;
pub mod stats;
pub mod transfer;

#[cfg(test)]
pub mod testing;

pub use detector::{ChangeDetector, CompareConfig, Decision, Detection, UploadReason};
pub use engine::{MirrorEngine, MirrorTarget};
pub use error::MirrorError;
pub use lister::{list_candidates, parse_listing, Candidate, SeenSet};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use retry::{RetryError, RetryPolicy};
pub use stats::{RunAggregator, RunResult, RunStats, RunStatus};
pub use transfer::TransferExecutor;
