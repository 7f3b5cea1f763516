//! Error types for rplus

use crate::types::ChangeId;
use thiserror::Error;

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum Error {
    /// GitHub API returned an error or an unexpected payload
    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    /// Generic platform failure (used by test doubles and adapters)
    #[error("platform error: {0}")]
    Platform(String),

    /// Queue record could not be read or written
    #[error("queue storage error: {0}")]
    Storage(String),

    /// Repository owner/name is not a safe storage path component
    #[error("invalid repository identity: {0}")]
    InvalidRepository(String),

    /// Queue record carries a format version this build cannot read
    #[error("unsupported queue record version {0}")]
    UnsupportedFormat(u32),

    /// Attempted to promote an entry while another one is under test
    #[error("an active entry already exists (#{0} is under test)")]
    ActiveAlreadySet(ChangeId),

    /// Settings file is missing, malformed, or incomplete
    #[error("configuration error: {0}")]
    Config(String),

    /// Comment text is not a bot command
    #[error("command parse error: {0}")]
    Parse(String),

    /// Error surfaced by octocrab
    #[error(transparent)]
    Octocrab(#[from] octocrab::Error),

    /// Error surfaced by reqwest
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Filesystem error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result alias using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
