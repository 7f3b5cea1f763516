//! Shared setup for CLI commands
//!
//! Resolves the settings file and opens the queue store. Platform clients
//! are only built by commands that talk to GitHub.

use anyhow::{Context, Result};
use rplus::config::Settings;
use rplus::queue::QueueStore;
use std::path::Path;
use tracing::debug;

/// Settings and state shared by every command
pub struct AppContext {
    /// Validated settings
    pub settings: Settings,
    /// Queue records under `settings.state_dir`
    pub store: QueueStore,
}

impl AppContext {
    /// Load settings from `path` or the default location, then open the store
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Settings::default_path().context("no config directory on this platform")?,
        };
        debug!(path = %path.display(), "loading settings");

        let settings = Settings::load(&path)?;
        let store = QueueStore::open(&settings.state_dir).with_context(|| {
            format!("failed to open state dir {}", settings.state_dir.display())
        })?;

        Ok(Self { settings, store })
    }
}
