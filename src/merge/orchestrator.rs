//! Merge attempt orchestration
//!
//! Turns queue entries into tested, then merged or rejected, changes. Every
//! entry point takes the repository's queue handle and keeps it for the
//! whole event, including the platform calls made on the way, so two events
//! for the same repository never interleave.

use super::messages;
use super::oracle::MergeabilityOracle;
use crate::config::RepositorySettings;
use crate::error::Result;
use crate::platform::PlatformService;
use crate::queue::{QueueGuard, QueueRegistry};
use crate::types::{
    ChangeDetails, ChangeId, CiStatus, Mergeability, QueueEntry, RepoId, StatusLabel, StatusLink,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Drives the integration branch for every repository
pub struct MergeOrchestrator {
    platform: Arc<dyn PlatformService>,
    registry: Arc<QueueRegistry>,
    oracle: MergeabilityOracle,
}

impl MergeOrchestrator {
    /// Create an orchestrator
    pub fn new(
        platform: Arc<dyn PlatformService>,
        registry: Arc<QueueRegistry>,
        oracle: MergeabilityOracle,
    ) -> Self {
        Self {
            platform,
            registry,
            oracle,
        }
    }

    /// Platform used for all calls
    pub fn platform(&self) -> &dyn PlatformService {
        self.platform.as_ref()
    }

    /// Queue registry
    pub fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    /// Oracle used for mergeability checks
    pub const fn oracle(&self) -> MergeabilityOracle {
        self.oracle
    }

    /// Handle an accepted `r+` / `r=`.
    ///
    /// Marks the change as awaiting merge, acknowledges the approved head and,
    /// when auto-merge is on, queues it.
    pub async fn approve(
        &self,
        settings: &RepositorySettings,
        change: ChangeId,
        reviewers: &[String],
    ) -> Result<()> {
        let repo = settings.repo_id();
        self.label(&repo, change, Some(StatusLabel::AwaitingMerge))
            .await;

        let details = self.platform.fetch_change(&repo, change).await?;
        self.notify(&repo, change, &messages::approved(&details.head_sha, reviewers))
            .await;

        if settings.auto_merge {
            self.on_approved(settings, change, &details.head_sha).await?;
        }
        Ok(())
    }

    /// Queue `change` at `approved_head` and promote it if nothing is active
    pub async fn on_approved(
        &self,
        settings: &RepositorySettings,
        change: ChangeId,
        approved_head: &str,
    ) -> Result<()> {
        let repo = settings.repo_id();
        let handle = self.registry.handle(&repo)?;
        let mut queue = handle.lock().await?;

        if queue.enqueue(QueueEntry::new(change, approved_head)) {
            persist(&queue);
            info!(%repo, change, approved_head, "change queued");

            let first_in_line = queue.front().is_some_and(|e| e.change_id == change);
            if queue.has_active() || !first_in_line {
                self.notify(&repo, change, &messages::queued()).await;
            }
        } else {
            debug!(%repo, change, "re-approval of the same head");
        }

        self.advance(settings, &mut queue).await
    }

    /// Handle an accepted `r-` from `sender`
    pub async fn withdraw(
        &self,
        settings: &RepositorySettings,
        change: ChangeId,
        sender: &str,
    ) -> Result<()> {
        let repo = settings.repo_id();
        self.label(&repo, change, Some(StatusLabel::AwaitingReview))
            .await;
        self.notify(&repo, change, &messages::cancelled(sender))
            .await;

        if settings.auto_merge {
            self.on_withdrawn(settings, change).await?;
        }
        Ok(())
    }

    /// Remove `change` from the queue.
    ///
    /// Withdrawing the active entry abandons its test run and promotes the
    /// next entry.
    pub async fn on_withdrawn(&self, settings: &RepositorySettings, change: ChangeId) -> Result<bool> {
        let repo = settings.repo_id();
        let handle = self.registry.handle(&repo)?;
        let mut queue = handle.lock().await?;

        let was_active = queue.active().is_some_and(|a| a.change_id == change);
        if !queue.remove_by_change_id(change) {
            debug!(%repo, change, "withdrawn change was not queued");
            return Ok(false);
        }
        persist(&queue);
        info!(%repo, change, was_active, "change removed from queue");

        if was_active {
            self.advance(settings, &mut queue).await?;
        }
        Ok(true)
    }

    /// Promote the next viable entry if nothing is under test
    pub async fn try_next(&self, settings: &RepositorySettings) -> Result<()> {
        let repo = settings.repo_id();
        let handle = self.registry.handle(&repo)?;
        let mut queue = handle.lock().await?;
        self.advance(settings, &mut queue).await
    }

    /// React to a CI verdict for the integration branch tip `result_tip`
    pub async fn on_external_result(
        &self,
        settings: &RepositorySettings,
        result_tip: &str,
        status: CiStatus,
    ) -> Result<()> {
        let repo = settings.repo_id();
        let handle = self.registry.handle(&repo)?;
        let mut queue = handle.lock().await?;

        let Some(active) = queue.active().cloned() else {
            debug!(%repo, result_tip, "no active entry, ignoring CI result");
            return Ok(());
        };
        if active.test_tip.as_deref() != Some(result_tip) {
            debug!(
                %repo,
                result_tip,
                active_tip = ?active.test_tip,
                "CI result for a stale tip, ignoring"
            );
            return Ok(());
        }

        let change = active.change_id;
        let details = self
            .platform
            .fetch_change(&repo, change)
            .await
            .inspect_err(|e| warn!(%repo, change, "cannot read active change: {e}"))?;

        if details.is_open() {
            let links = self.status_links(&repo, result_tip).await;
            match status {
                CiStatus::Failure(conclusion) => {
                    info!(%repo, change, %conclusion, "integration tests failed");
                    self.notify(&repo, change, &messages::tests_failed(&conclusion, &links))
                        .await;
                    self.label(&repo, change, Some(StatusLabel::FailsTestsWithUpstream))
                        .await;
                }
                CiStatus::Success => {
                    self.merge_active(settings, &active, &details, &links).await;
                }
            }
        } else {
            info!(%repo, change, state = %details.state, "active change resolved elsewhere");
        }

        queue.remove_active();
        persist(&queue);
        self.advance(settings, &mut queue).await
    }

    async fn merge_active(
        &self,
        settings: &RepositorySettings,
        active: &QueueEntry,
        details: &ChangeDetails,
        links: &[StatusLink],
    ) {
        let repo = settings.repo_id();
        let change = active.change_id;

        if details.head_sha != active.approved_head {
            info!(
                %repo,
                change,
                approved = %active.approved_head,
                current = %details.head_sha,
                "head moved after approval, not merging"
            );
            self.notify(&repo, change, &messages::head_changed()).await;
            self.label(&repo, change, Some(StatusLabel::AwaitingReview))
                .await;
            return;
        }

        match self
            .platform
            .merge_change(&repo, change, &active.approved_head)
            .await
        {
            Ok(result) if result.merged => {
                info!(%repo, change, sha = ?result.sha, "merged");
                self.notify(&repo, change, &messages::merged(links)).await;
                if settings.delete_branch_after_merge {
                    self.delete_source_branch(&repo, details).await;
                }
            }
            Ok(result) => {
                let reason = result
                    .message
                    .unwrap_or_else(|| "the merge was not performed".to_string());
                warn!(%repo, change, %reason, "merge refused");
                self.notify(&repo, change, &messages::merge_failed(&reason))
                    .await;
            }
            Err(e) => {
                warn!(%repo, change, "merge failed: {e}");
                self.notify(&repo, change, &messages::merge_failed(&e.to_string()))
                    .await;
            }
        }
    }

    async fn delete_source_branch(&self, repo: &RepoId, details: &ChangeDetails) {
        if details.head_repo.as_ref() != Some(repo) {
            debug!(%repo, change = details.number, "source branch lives in a fork, keeping it");
            return;
        }
        if let Err(e) = self.platform.delete_branch(repo, &details.head_ref).await {
            warn!(%repo, branch = %details.head_ref, "failed to delete source branch: {e}");
        }
    }

    /// Pop entries until one is promoted or the queue is drained.
    async fn advance(&self, settings: &RepositorySettings, queue: &mut QueueGuard<'_>) -> Result<()> {
        let repo = settings.repo_id();
        if let Some(active) = queue.active() {
            debug!(%repo, change = active.change_id, "entry already under test");
            return Ok(());
        }

        let mut taken = false;
        while let Some(mut entry) = queue.take_next() {
            taken = true;
            let change = entry.change_id;
            let tip = match self.promote(settings, &entry).await {
                Ok(Some(tip)) => tip,
                Ok(None) => continue,
                Err(e) => {
                    warn!(%repo, change, "dropping candidate after error: {e}");
                    continue;
                }
            };

            entry.test_tip = Some(tip);
            if let Err(e) = queue.set_active(entry) {
                error!(%repo, change, "ASSERT: promotion with an active entry present: {e}");
                persist(queue);
                return Err(e);
            }
            persist(queue);
            info!(%repo, change, "change under test");
            return Ok(());
        }

        if taken {
            debug!(%repo, "queue drained");
            persist(queue);
        }
        Ok(())
    }

    /// Validate a candidate and build the integration branch for it.
    ///
    /// Returns the new branch tip, or `None` if the candidate was discarded.
    async fn promote(
        &self,
        settings: &RepositorySettings,
        entry: &QueueEntry,
    ) -> Result<Option<String>> {
        let repo = settings.repo_id();
        let change = entry.change_id;
        let details = self.platform.fetch_change(&repo, change).await?;

        if details.head_sha != entry.approved_head {
            info!(
                %repo,
                change,
                approved = %entry.approved_head,
                current = %details.head_sha,
                "stale approval, discarding"
            );
            self.notify(&repo, change, &messages::head_changed()).await;
            self.label(&repo, change, Some(StatusLabel::AwaitingReview))
                .await;
            return Ok(None);
        }

        if !details.is_open() {
            info!(%repo, change, state = %details.state, "candidate no longer open, discarding");
            return Ok(None);
        }

        if self.oracle.check(self.platform(), &repo, change).await? == Mergeability::NotMergeable {
            info!(%repo, change, "candidate conflicts with trunk, discarding");
            self.notify(&repo, change, &messages::merge_conflict()).await;
            self.label(&repo, change, Some(StatusLabel::NeedsRebase))
                .await;
            return Ok(None);
        }

        if !details.has_label(StatusLabel::AwaitingMerge) {
            info!(%repo, change, "candidate lost its approval label, discarding");
            return Ok(None);
        }

        let branch = &settings.integration_branch;
        let tip = match self
            .platform
            .build_integration_branch(&repo, change, branch)
            .await
        {
            Ok(tip) => tip,
            Err(e) => {
                // the host has no trunk merge for a change it could not merge
                warn!(%repo, change, %branch, "failed to build integration branch: {e}");
                self.notify(&repo, change, &messages::integration_failed(branch, &e.to_string()))
                    .await;
                self.label(&repo, change, Some(StatusLabel::NeedsRebase))
                    .await;
                return Ok(None);
            }
        };
        self.notify(&repo, change, &messages::testing(&entry.approved_head, branch, &tip))
            .await;
        Ok(Some(tip))
    }

    async fn status_links(&self, repo: &RepoId, reference: &str) -> Vec<StatusLink> {
        self.platform
            .status_links(repo, reference)
            .await
            .unwrap_or_else(|e| {
                warn!(%repo, reference, "failed to fetch status links: {e}");
                Vec::new()
            })
    }

    async fn notify(&self, repo: &RepoId, change: ChangeId, body: &str) {
        if let Err(e) = self.platform.notify(repo, change, body).await {
            warn!(%repo, change, "failed to post comment: {e}");
        }
    }

    async fn label(&self, repo: &RepoId, change: ChangeId, label: Option<StatusLabel>) {
        if let Err(e) = self.platform.set_status_label(repo, change, label).await {
            warn!(%repo, change, ?label, "failed to update status label: {e}");
        }
    }
}

/// Save the queue; failures are logged by the guard and retried on the
/// next mutation.
fn persist(queue: &QueueGuard<'_>) {
    let _ = queue.save();
}
