//! Shared test fixtures

#![allow(dead_code)]

pub mod mock_platform;

pub use mock_platform::{Call, MockPlatformService};

use rplus::config::RepositorySettings;
use rplus::merge::{MergeOrchestrator, MergeabilityOracle};
use rplus::platform::PlatformService;
use rplus::queue::{QueueRegistry, QueueStore};
use rplus::types::{ChangeDetails, ChangeId, ChangeState, RepoId, StatusLabel};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub fn repo() -> RepoId {
    RepoId::new("octo", "widgets")
}

/// Settings with auto-merge on and `alice` as reviewer
pub fn auto_merge_settings() -> RepositorySettings {
    let mut settings = RepositorySettings::defaults_for(&repo());
    settings.reviewers = vec!["alice".to_string()];
    settings.auto_merge = true;
    settings
}

/// An open, mergeable change on `master` without status labels
pub fn make_change(number: ChangeId, head: &str) -> ChangeDetails {
    ChangeDetails {
        number,
        head_sha: head.to_string(),
        state: ChangeState::Open,
        base_ref: "master".to_string(),
        head_ref: format!("feature-{number}"),
        head_repo: Some(repo()),
        mergeable: Some(true),
        labels: vec!["bug".to_string()],
        html_url: format!("https://github.com/octo/widgets/pull/{number}"),
    }
}

/// Same as [`make_change`], already labeled awaiting merge
pub fn approved_change(number: ChangeId, head: &str) -> ChangeDetails {
    let mut change = make_change(number, head);
    change.labels.push(StatusLabel::AwaitingMerge.as_str().to_string());
    change
}

pub fn registry(state_dir: &Path) -> Arc<QueueRegistry> {
    Arc::new(QueueRegistry::new(QueueStore::open(state_dir).unwrap()))
}

/// Orchestrator over `mock` whose oracle never sleeps
pub fn orchestrator(mock: &Arc<MockPlatformService>, state_dir: &Path) -> MergeOrchestrator {
    let platform: Arc<dyn PlatformService> = mock.clone();
    MergeOrchestrator::new(
        platform,
        registry(state_dir),
        MergeabilityOracle::new(Duration::ZERO),
    )
}
