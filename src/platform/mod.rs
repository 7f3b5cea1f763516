//! Code-host services consumed by the merge engine
//!
//! Everything the queue engine needs from the outside world goes through
//! [`PlatformService`], so the orchestrator can run against GitHub in
//! production and a recording mock in tests.

mod github;

pub use github::GitHubService;

use crate::error::Result;
use crate::types::{
    ChangeDetails, ChangeId, MergeResult, Mergeability, RepoId, StatusLabel, StatusLink,
    replace_status_label,
};
use async_trait::async_trait;
use tracing::debug;

/// Platform service trait for change, branch and label operations
#[async_trait]
pub trait PlatformService: Send + Sync {
    /// Read the current state of a change
    async fn fetch_change(&self, repo: &RepoId, change: ChangeId) -> Result<ChangeDetails>;

    /// Single query of the host's mergeability computation.
    ///
    /// The default reads the `mergeable` field of [`fetch_change`].
    ///
    /// [`fetch_change`]: Self::fetch_change
    async fn check_mergeable(&self, repo: &RepoId, change: ChangeId) -> Result<Mergeability> {
        Ok(self.fetch_change(repo, change).await?.mergeable.into())
    }

    /// Reset `branch` to the host's trunk merge of `change`.
    ///
    /// Returns the new branch tip.
    async fn build_integration_branch(
        &self,
        repo: &RepoId,
        change: ChangeId,
        branch: &str,
    ) -> Result<String>;

    /// Merge `change` into its base, only if its head still is `required_head`
    async fn merge_change(
        &self,
        repo: &RepoId,
        change: ChangeId,
        required_head: &str,
    ) -> Result<MergeResult>;

    /// Delete a branch of `repo`
    async fn delete_branch(&self, repo: &RepoId, branch: &str) -> Result<()>;

    /// Post a comment on a change
    async fn notify(&self, repo: &RepoId, change: ChangeId, body: &str) -> Result<()>;

    /// Replace the full label set of a change
    async fn replace_labels(&self, repo: &RepoId, change: ChangeId, labels: &[String])
    -> Result<()>;

    /// Swap the status label of a change, keeping unrelated labels.
    ///
    /// `None` removes every status label.
    async fn set_status_label(
        &self,
        repo: &RepoId,
        change: ChangeId,
        label: Option<StatusLabel>,
    ) -> Result<()> {
        let current = self.fetch_change(repo, change).await?.labels;
        let labels = replace_status_label(&current, label);
        if labels == current {
            debug!(%repo, change, "status label unchanged");
            return Ok(());
        }
        self.replace_labels(repo, change, &labels).await
    }

    /// Open changes targeting `base`
    async fn list_open_changes(&self, repo: &RepoId, base: &str) -> Result<Vec<ChangeDetails>>;

    /// CI status links of `reference` (branch name or commit)
    async fn status_links(&self, repo: &RepoId, reference: &str) -> Result<Vec<StatusLink>>;

    /// Assign users to a change
    async fn add_assignees(&self, repo: &RepoId, change: ChangeId, users: &[String])
    -> Result<()>;
}
