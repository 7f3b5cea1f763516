//! CLI command implementations

mod context;
mod queue;
mod serve;

pub use context::AppContext;
pub use queue::run_queue_show;
pub use serve::run_serve;
