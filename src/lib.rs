//! rplus - a merge queue bot for GitHub
//!
//! Reviewers approve pull requests with `@bot r+`. Approved changes are
//! queued per repository; the head of the queue is merged onto an
//! integration branch together with the latest trunk, and is merged for
//! real only once CI passes on that branch.

pub mod command;
pub mod config;
pub mod error;
pub mod merge;
pub mod platform;
pub mod queue;
pub mod server;
pub mod types;

pub use error::{Error, Result};
