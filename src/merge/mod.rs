//! Merge engine
//!
//! - [`oracle`] resolves mergeability with a single bounded retry
//! - [`orchestrator`] promotes queue entries and reacts to CI results
//! - [`sweep`] flags changes a trunk push made unmergeable

pub mod messages;
pub mod oracle;
pub mod orchestrator;
pub mod sweep;

pub use oracle::{DEFAULT_RETRY_DELAY, MergeabilityOracle};
pub use orchestrator::MergeOrchestrator;
pub use sweep::{SWEEP_CONCURRENCY, SweepReport, detect_unmergeable};
