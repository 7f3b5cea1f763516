//! Mock platform service for testing
//!
//! These are test utilities - not all may be used in every test binary.

#![allow(dead_code)]

use async_trait::async_trait;
use rplus::error::{Error, Result};
use rplus::platform::PlatformService;
use rplus::types::{
    ChangeDetails, ChangeId, ChangeState, MergeResult, Mergeability, RepoId, StatusLink,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// A recorded platform call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FetchChange(ChangeId),
    CheckMergeable(ChangeId),
    BuildIntegrationBranch { change: ChangeId, branch: String },
    MergeChange { change: ChangeId, required_head: String },
    DeleteBranch(String),
    Notify { change: ChangeId, body: String },
    ReplaceLabels { change: ChangeId, labels: Vec<String> },
    ListOpenChanges(String),
    StatusLinks(String),
    AddAssignees { change: ChangeId, users: Vec<String> },
}

/// In-memory code host
///
/// Features:
/// - Per-change details, mutated by label and merge calls
/// - Scripted mergeability answers
/// - Call tracking for verification
/// - Error injection for failure path testing
pub struct MockPlatformService {
    changes: Mutex<HashMap<ChangeId, ChangeDetails>>,
    mergeability: Mutex<HashMap<ChangeId, VecDeque<Mergeability>>>,
    merge_responses: Mutex<HashMap<ChangeId, MergeResult>>,
    status_links: Mutex<Vec<StatusLink>>,
    next_tip: AtomicU64,
    calls: Mutex<Vec<Call>>,
    // Error injection
    fail_fetch: Mutex<HashSet<ChangeId>>,
    fail_mergeable: Mutex<HashSet<ChangeId>>,
    error_on_build: Mutex<Option<String>>,
    error_on_merge: Mutex<Option<String>>,
    error_on_notify: Mutex<Option<String>>,
}

impl Default for MockPlatformService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatformService {
    pub fn new() -> Self {
        Self {
            changes: Mutex::new(HashMap::new()),
            mergeability: Mutex::new(HashMap::new()),
            merge_responses: Mutex::new(HashMap::new()),
            status_links: Mutex::new(Vec::new()),
            next_tip: AtomicU64::new(1),
            calls: Mutex::new(Vec::new()),
            fail_fetch: Mutex::new(HashSet::new()),
            fail_mergeable: Mutex::new(HashSet::new()),
            error_on_build: Mutex::new(None),
            error_on_merge: Mutex::new(None),
            error_on_notify: Mutex::new(None),
        }
    }

    // === Setup ===

    /// Register or replace a change
    pub fn set_change(&self, details: ChangeDetails) {
        self.changes.lock().unwrap().insert(details.number, details);
    }

    /// Move the head of a change
    pub fn set_head(&self, change: ChangeId, head: &str) {
        if let Some(details) = self.changes.lock().unwrap().get_mut(&change) {
            details.head_sha = head.to_string();
        }
    }

    /// Change the open/closed/merged state of a change
    pub fn set_state(&self, change: ChangeId, state: ChangeState) {
        if let Some(details) = self.changes.lock().unwrap().get_mut(&change) {
            details.state = state;
        }
    }

    /// Script the answers of `check_mergeable`; once drained the stored
    /// `mergeable` field is used
    pub fn script_mergeability(&self, change: ChangeId, answers: &[Mergeability]) {
        self.mergeability
            .lock()
            .unwrap()
            .insert(change, answers.iter().copied().collect());
    }

    /// Set the response for `merge_change`
    pub fn set_merge_response(&self, change: ChangeId, result: MergeResult) {
        self.merge_responses.lock().unwrap().insert(change, result);
    }

    /// Set the links returned by `status_links`
    pub fn set_status_links(&self, links: Vec<StatusLink>) {
        *self.status_links.lock().unwrap() = links;
    }

    // === Error injection ===

    pub fn fail_fetch(&self, change: ChangeId) {
        self.fail_fetch.lock().unwrap().insert(change);
    }

    pub fn fail_mergeable(&self, change: ChangeId) {
        self.fail_mergeable.lock().unwrap().insert(change);
    }

    pub fn fail_build(&self, msg: &str) {
        *self.error_on_build.lock().unwrap() = Some(msg.to_string());
    }

    pub fn fail_merge(&self, msg: &str) {
        *self.error_on_merge.lock().unwrap() = Some(msg.to_string());
    }

    pub fn fail_notify(&self, msg: &str) {
        *self.error_on_notify.lock().unwrap() = Some(msg.to_string());
    }

    // === Inspection ===

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn change(&self, change: ChangeId) -> ChangeDetails {
        self.changes.lock().unwrap()[&change].clone()
    }

    pub fn labels(&self, change: ChangeId) -> Vec<String> {
        self.change(change).labels
    }

    /// Comments posted on `change`, oldest first
    pub fn comments(&self, change: ChangeId) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Notify { change: n, body } if n == change => Some(body),
                _ => None,
            })
            .collect()
    }

    /// Changes the integration branch was built for, in order
    pub fn builds(&self) -> Vec<ChangeId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::BuildIntegrationBranch { change, .. } => Some(change),
                _ => None,
            })
            .collect()
    }

    /// `(change, required_head)` of every merge call
    pub fn merges(&self) -> Vec<(ChangeId, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::MergeChange {
                    change,
                    required_head,
                } => Some((change, required_head)),
                _ => None,
            })
            .collect()
    }

    pub fn mergeable_checks(&self, change: ChangeId) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == Call::CheckMergeable(change))
            .count()
    }

    pub fn deleted_branches(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::DeleteBranch(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PlatformService for MockPlatformService {
    async fn fetch_change(&self, _repo: &RepoId, change: ChangeId) -> Result<ChangeDetails> {
        self.record(Call::FetchChange(change));
        if self.fail_fetch.lock().unwrap().contains(&change) {
            return Err(Error::Platform(format!("fetch of #{change} failed")));
        }
        self.changes
            .lock()
            .unwrap()
            .get(&change)
            .cloned()
            .ok_or_else(|| Error::Platform(format!("no change #{change}")))
    }

    async fn check_mergeable(&self, _repo: &RepoId, change: ChangeId) -> Result<Mergeability> {
        self.record(Call::CheckMergeable(change));
        if self.fail_mergeable.lock().unwrap().contains(&change) {
            return Err(Error::Platform(format!("mergeability of #{change} failed")));
        }
        if let Some(next) = self
            .mergeability
            .lock()
            .unwrap()
            .get_mut(&change)
            .and_then(VecDeque::pop_front)
        {
            return Ok(next);
        }
        let changes = self.changes.lock().unwrap();
        let details = changes
            .get(&change)
            .ok_or_else(|| Error::Platform(format!("no change #{change}")))?;
        Ok(details.mergeable.into())
    }

    async fn build_integration_branch(
        &self,
        _repo: &RepoId,
        change: ChangeId,
        branch: &str,
    ) -> Result<String> {
        self.record(Call::BuildIntegrationBranch {
            change,
            branch: branch.to_string(),
        });
        if let Some(msg) = self.error_on_build.lock().unwrap().as_ref() {
            return Err(Error::Platform(msg.clone()));
        }
        let n = self.next_tip.fetch_add(1, Ordering::SeqCst);
        Ok(format!("tip-{change}-{n}"))
    }

    async fn merge_change(
        &self,
        _repo: &RepoId,
        change: ChangeId,
        required_head: &str,
    ) -> Result<MergeResult> {
        self.record(Call::MergeChange {
            change,
            required_head: required_head.to_string(),
        });
        if let Some(msg) = self.error_on_merge.lock().unwrap().as_ref() {
            return Err(Error::Platform(msg.clone()));
        }
        let result = self
            .merge_responses
            .lock()
            .unwrap()
            .get(&change)
            .cloned()
            .unwrap_or(MergeResult {
                merged: true,
                sha: Some(format!("merge-{change}")),
                message: None,
            });
        if result.merged {
            self.set_state(change, ChangeState::Merged);
        }
        Ok(result)
    }

    async fn delete_branch(&self, _repo: &RepoId, branch: &str) -> Result<()> {
        self.record(Call::DeleteBranch(branch.to_string()));
        Ok(())
    }

    async fn notify(&self, _repo: &RepoId, change: ChangeId, body: &str) -> Result<()> {
        self.record(Call::Notify {
            change,
            body: body.to_string(),
        });
        if let Some(msg) = self.error_on_notify.lock().unwrap().as_ref() {
            return Err(Error::Platform(msg.clone()));
        }
        Ok(())
    }

    async fn replace_labels(
        &self,
        _repo: &RepoId,
        change: ChangeId,
        labels: &[String],
    ) -> Result<()> {
        self.record(Call::ReplaceLabels {
            change,
            labels: labels.to_vec(),
        });
        if let Some(details) = self.changes.lock().unwrap().get_mut(&change) {
            details.labels = labels.to_vec();
        }
        Ok(())
    }

    async fn list_open_changes(&self, _repo: &RepoId, base: &str) -> Result<Vec<ChangeDetails>> {
        self.record(Call::ListOpenChanges(base.to_string()));
        let mut open: Vec<ChangeDetails> = self
            .changes
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.is_open() && c.base_ref == base)
            .cloned()
            .collect();
        open.sort_by_key(|c| c.number);
        Ok(open)
    }

    async fn status_links(&self, _repo: &RepoId, reference: &str) -> Result<Vec<StatusLink>> {
        self.record(Call::StatusLinks(reference.to_string()));
        Ok(self.status_links.lock().unwrap().clone())
    }

    async fn add_assignees(
        &self,
        _repo: &RepoId,
        change: ChangeId,
        users: &[String],
    ) -> Result<()> {
        self.record(Call::AddAssignees {
            change,
            users: users.to_vec(),
        });
        Ok(())
    }
}
