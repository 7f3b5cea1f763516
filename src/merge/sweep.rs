//! Unmergeable-change detection after a trunk push
//!
//! Every open change targeting trunk is re-checked through the oracle.
//! Checks run concurrently, bounded by a semaphore, and one failing check
//! never aborts the others.

use super::messages;
use super::oracle::MergeabilityOracle;
use crate::error::Result;
use crate::platform::PlatformService;
use crate::types::{ChangeId, Mergeability, RepoId, StatusLabel};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Concurrent mergeability checks per sweep
pub const SWEEP_CONCURRENCY: usize = 8;

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Changes checked
    pub checked: usize,
    /// Changes found unmergeable and labeled
    pub unmergeable: Vec<ChangeId>,
    /// Changes whose check failed
    pub failed: Vec<ChangeId>,
}

enum Verdict {
    Mergeable,
    Unmergeable,
    Failed,
}

/// Label and comment every open change on `trunk` that no longer merges.
///
/// Changes already labeled `S-needs-rebase` are skipped. `compare_url` is
/// the push's compare link, quoted in the comment.
pub async fn detect_unmergeable(
    platform: Arc<dyn PlatformService>,
    oracle: MergeabilityOracle,
    repo: &RepoId,
    trunk: &str,
    compare_url: Option<&str>,
) -> Result<SweepReport> {
    let changes = platform.list_open_changes(repo, trunk).await?;
    let candidates: Vec<ChangeId> = changes
        .iter()
        .filter(|c| !c.has_label(StatusLabel::NeedsRebase))
        .map(|c| c.number)
        .collect();
    debug!(%repo, total = changes.len(), candidates = candidates.len(), "starting sweep");

    let semaphore = Arc::new(Semaphore::new(SWEEP_CONCURRENCY));
    let comment = Arc::new(messages::unmergeable_after_push(compare_url));
    let mut join_set = JoinSet::new();

    for change in candidates {
        let platform = Arc::clone(&platform);
        let semaphore = Arc::clone(&semaphore);
        let comment = Arc::clone(&comment);
        let repo = repo.clone();

        join_set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (change, Verdict::Failed);
            };
            (change, check_one(platform.as_ref(), oracle, &repo, change, &comment).await)
        });
    }

    let mut report = SweepReport::default();
    while let Some(joined) = join_set.join_next().await {
        let Ok((change, verdict)) = joined else {
            warn!(%repo, "sweep worker panicked");
            continue;
        };
        report.checked += 1;
        match verdict {
            Verdict::Mergeable => {}
            Verdict::Unmergeable => report.unmergeable.push(change),
            Verdict::Failed => report.failed.push(change),
        }
    }
    report.unmergeable.sort_unstable();
    report.failed.sort_unstable();

    info!(
        %repo,
        checked = report.checked,
        unmergeable = report.unmergeable.len(),
        failed = report.failed.len(),
        "sweep complete"
    );
    Ok(report)
}

async fn check_one(
    platform: &dyn PlatformService,
    oracle: MergeabilityOracle,
    repo: &RepoId,
    change: ChangeId,
    comment: &str,
) -> Verdict {
    match oracle.check(platform, repo, change).await {
        Ok(Mergeability::NotMergeable) => {}
        Ok(_) => return Verdict::Mergeable,
        Err(e) => {
            warn!(%repo, change, "mergeability check failed: {e}");
            return Verdict::Failed;
        }
    }

    info!(%repo, change, "change became unmergeable");
    if let Err(e) = platform.notify(repo, change, comment).await {
        warn!(%repo, change, "failed to post comment: {e}");
    }
    if let Err(e) = platform
        .set_status_label(repo, change, Some(StatusLabel::NeedsRebase))
        .await
    {
        warn!(%repo, change, "failed to set label: {e}");
    }
    Verdict::Unmergeable
}
