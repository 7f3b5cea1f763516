//! Core types for rplus

use serde::{Deserialize, Serialize};

/// Identifier of a change (pull request number), unique within a repository
pub type ChangeId = u64;

/// Repository identity: the `(owner, name)` pair keying both the queue
/// registry and the queue store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoId {
    /// Repository owner (user or organization)
    pub owner: String,
    /// Repository name
    pub name: String,
}

impl RepoId {
    /// Create a new repository identity
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse `owner/name`. A single trailing slash is tolerated.
    pub fn parse(full_name: &str) -> Option<Self> {
        let trimmed = full_name.strip_suffix('/').unwrap_or(full_name);
        let (owner, name) = trimmed.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(owner, name))
    }
}

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// One approved, not-yet-merged change inside a merge queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Pull request number
    pub change_id: ChangeId,
    /// Head commit of the change when it was approved
    pub approved_head: String,
    /// Tip of the integration branch testing this entry (set on promotion)
    #[serde(default)]
    pub test_tip: Option<String>,
}

impl QueueEntry {
    /// Create a freshly approved entry with no test tip
    pub fn new(change_id: ChangeId, approved_head: impl Into<String>) -> Self {
        Self {
            change_id,
            approved_head: approved_head.into(),
            test_tip: None,
        }
    }
}

/// Change state (open, closed, merged)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeState {
    /// Change is open
    Open,
    /// Change was closed without merging
    Closed,
    /// Change was merged
    Merged,
}

impl std::fmt::Display for ChangeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Merged => write!(f, "merged"),
        }
    }
}

/// Live state of a change as reported by the code host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeDetails {
    /// Pull request number
    pub number: ChangeId,
    /// Current head commit
    pub head_sha: String,
    /// Open / closed / merged
    pub state: ChangeState,
    /// Base branch name
    pub base_ref: String,
    /// Head branch name
    pub head_ref: String,
    /// Owner of the repository the head branch lives in (differs for forks)
    pub head_repo: Option<RepoId>,
    /// Host's mergeability verdict; `None` while still computing
    pub mergeable: Option<bool>,
    /// Label names currently on the change
    pub labels: Vec<String>,
    /// Web URL
    pub html_url: String,
}

impl ChangeDetails {
    /// Whether the change is still open
    pub const fn is_open(&self) -> bool {
        matches!(self.state, ChangeState::Open)
    }

    /// Whether `label` is currently on the change
    pub fn has_label(&self, label: StatusLabel) -> bool {
        self.labels.iter().any(|l| l == label.as_str())
    }
}

/// Result of a single mergeability query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mergeability {
    /// No conflicts with trunk
    Mergeable,
    /// Conflicts with trunk
    NotMergeable,
    /// Host is still computing
    Unknown,
}

impl From<Option<bool>> for Mergeability {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Self::Mergeable,
            Some(false) => Self::NotMergeable,
            None => Self::Unknown,
        }
    }
}

/// Outcome reported by CI for an integration-branch tip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiStatus {
    /// All checks passed
    Success,
    /// Checks failed; carries the conclusion reported by CI (e.g. `failure`, `timed_out`)
    Failure(String),
}

impl CiStatus {
    /// Map a GitHub status state / check conclusion to a CI outcome.
    ///
    /// Returns `None` for states that are not final (`pending`, `queued`, ...).
    pub fn from_conclusion(conclusion: &str) -> Option<Self> {
        match conclusion {
            "success" => Some(Self::Success),
            "pending" | "queued" | "in_progress" | "" => None,
            other => Some(Self::Failure(other.to_string())),
        }
    }
}

/// Prefix shared by all status labels managed by the bot
pub const STATUS_LABEL_PREFIX: &str = "S-";

/// Status label kept on a change; at most one is present at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLabel {
    /// Waiting for a reviewer
    AwaitingReview,
    /// Approved and queued
    AwaitingMerge,
    /// Conflicts with trunk
    NeedsRebase,
    /// Failed CI when merged with trunk
    FailsTestsWithUpstream,
}

impl StatusLabel {
    /// Label name as it appears on the code host
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingReview => "S-awaiting-review",
            Self::AwaitingMerge => "S-awaiting-merge",
            Self::NeedsRebase => "S-needs-rebase",
            Self::FailsTestsWithUpstream => "S-fails-tests-with-upstream",
        }
    }
}

impl std::fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the label set after swapping the status label.
///
/// Every `S-` label is dropped, unrelated labels keep their order, and `new`
/// (if any) is appended.
pub fn replace_status_label(current: &[String], new: Option<StatusLabel>) -> Vec<String> {
    let mut labels: Vec<String> = current
        .iter()
        .filter(|l| !l.starts_with(STATUS_LABEL_PREFIX))
        .cloned()
        .collect();
    if let Some(label) = new {
        labels.push(label.as_str().to_string());
    }
    labels
}

/// Result of a merge operation
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// Whether the merge was successful
    pub merged: bool,
    /// The SHA of the merge commit (if successful)
    pub sha: Option<String>,
    /// Message from the merge operation (especially on failure)
    pub message: Option<String>,
}

/// A CI status entry with a link, used to enrich result comments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLink {
    /// Status description, may be empty
    pub description: Option<String>,
    /// Link to the CI run
    pub target_url: String,
}
