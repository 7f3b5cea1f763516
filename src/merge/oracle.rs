//! Mergeability oracle
//!
//! GitHub computes mergeability in the background, so a fresh query may
//! come back unknown. The oracle waits once and re-queries; if the answer is
//! still unknown the change is assumed mergeable. A conflicting change that
//! slips through fails when the integration branch is built or tested.

use crate::error::Result;
use crate::platform::PlatformService;
use crate::types::{ChangeId, Mergeability, RepoId};
use std::time::Duration;
use tracing::{debug, info};

/// Wait before the single re-query
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Bounded-retry mergeability check
#[derive(Debug, Clone, Copy)]
pub struct MergeabilityOracle {
    retry_delay: Duration,
}

impl Default for MergeabilityOracle {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY)
    }
}

impl MergeabilityOracle {
    /// Oracle waiting `retry_delay` before re-querying
    pub const fn new(retry_delay: Duration) -> Self {
        Self { retry_delay }
    }

    /// Resolve the mergeability of `change`.
    ///
    /// Never returns [`Mergeability::Unknown`].
    pub async fn check(
        &self,
        platform: &dyn PlatformService,
        repo: &RepoId,
        change: ChangeId,
    ) -> Result<Mergeability> {
        let first = platform.check_mergeable(repo, change).await?;
        if first != Mergeability::Unknown {
            debug!(%repo, change, ?first, "mergeability known");
            return Ok(first);
        }

        debug!(%repo, change, delay = ?self.retry_delay, "mergeability unknown, retrying once");
        tokio::time::sleep(self.retry_delay).await;

        match platform.check_mergeable(repo, change).await? {
            Mergeability::Unknown => {
                info!(%repo, change, "mergeability still unknown, assuming mergeable");
                Ok(Mergeability::Mergeable)
            }
            known => Ok(known),
        }
    }
}
