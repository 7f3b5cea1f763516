//! GitHub webhook payloads and their dispatch to the merge engine

use super::AppState;
use crate::command::{Command, parse_command, resolve_reviewers};
use crate::config::RepositorySettings;
use crate::error::{Error, Result};
use crate::merge::detect_unmergeable;
use crate::types::{ChangeId, CiStatus, RepoId, StatusLabel};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Repository block shared by all payloads
#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    /// Repository name
    pub name: String,
    /// Owning account
    pub owner: User,
}

impl Repository {
    /// Repository identity
    pub fn id(&self) -> RepoId {
        RepoId::new(&self.owner.login, &self.name)
    }
}

/// A GitHub account
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    /// Login name
    pub login: String,
}

/// `issue_comment` payload
#[derive(Debug, Clone, Deserialize)]
pub struct IssueCommentEvent {
    /// `created`, `edited` or `deleted`
    pub action: String,
    /// Issue or pull request commented on
    pub issue: Issue,
    /// The comment
    pub comment: Comment,
    /// Repository
    pub repository: Repository,
    /// Comment author
    pub sender: User,
}

/// Issue block of a comment event
#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    /// Issue / pull request number
    pub number: ChangeId,
    /// Opener
    pub user: User,
    /// Present when the issue is a pull request
    pub pull_request: Option<serde_json::Value>,
}

/// Comment block of a comment event
#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    /// Markdown body
    #[serde(default)]
    pub body: String,
}

/// `push` payload
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    /// Pushed ref, e.g. `refs/heads/master`
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Compare URL of the pushed range
    pub compare: Option<String>,
    /// Repository
    pub repository: Repository,
}

/// `status` payload
#[derive(Debug, Clone, Deserialize)]
pub struct StatusEvent {
    /// Commit the status is for
    pub sha: String,
    /// `pending`, `success`, `failure` or `error`
    pub state: String,
    /// Branches whose tip is `sha`
    #[serde(default)]
    pub branches: Vec<Branch>,
    /// Repository
    pub repository: Repository,
}

/// Branch block of a status event
#[derive(Debug, Clone, Deserialize)]
pub struct Branch {
    /// Branch name
    pub name: String,
}

/// `check_suite` payload
#[derive(Debug, Clone, Deserialize)]
pub struct CheckSuiteEvent {
    /// `completed`, `requested` or `rerequested`
    pub action: String,
    /// The suite
    pub check_suite: CheckSuite,
    /// Repository
    pub repository: Repository,
}

/// Suite block of a `check_suite` event
#[derive(Debug, Clone, Deserialize)]
pub struct CheckSuite {
    /// Commit the suite ran on
    pub head_sha: String,
    /// Branch the suite ran on
    pub head_branch: Option<String>,
    /// Final conclusion, once completed
    pub conclusion: Option<String>,
}

/// `pull_request` payload
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    /// `opened`, `closed`, `synchronize`, ...
    pub action: String,
    /// Pull request number
    pub number: ChangeId,
    /// Repository
    pub repository: Repository,
}

/// `ping` payload
#[derive(Debug, Clone, Deserialize)]
pub struct PingEvent {
    /// Repository, absent for organization hooks
    pub repository: Option<Repository>,
}

/// A webhook delivery, keyed by the `X-GitHub-Event` header
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    /// `issue_comment`
    IssueComment(IssueCommentEvent),
    /// `push`
    Push(PushEvent),
    /// `status`
    Status(StatusEvent),
    /// `check_suite`
    CheckSuite(CheckSuiteEvent),
    /// `pull_request`
    PullRequest(PullRequestEvent),
    /// `ping`
    Ping(PingEvent),
    /// Anything else; acknowledged and ignored
    Other(String),
}

impl WebhookEvent {
    /// Parse a payload of event type `kind`
    pub fn parse(kind: &str, body: &[u8]) -> Result<Self> {
        Ok(match kind {
            "issue_comment" => Self::IssueComment(serde_json::from_slice(body)?),
            "push" => Self::Push(serde_json::from_slice(body)?),
            "status" => Self::Status(serde_json::from_slice(body)?),
            "check_suite" => Self::CheckSuite(serde_json::from_slice(body)?),
            "pull_request" => Self::PullRequest(serde_json::from_slice(body)?),
            "ping" => Self::Ping(serde_json::from_slice(body)?),
            other => Self::Other(other.to_string()),
        })
    }

    /// Repository the event belongs to
    pub fn repository(&self) -> Option<RepoId> {
        match self {
            Self::IssueComment(e) => Some(e.repository.id()),
            Self::Push(e) => Some(e.repository.id()),
            Self::Status(e) => Some(e.repository.id()),
            Self::CheckSuite(e) => Some(e.repository.id()),
            Self::PullRequest(e) => Some(e.repository.id()),
            Self::Ping(e) => e.repository.as_ref().map(Repository::id),
            Self::Other(_) => None,
        }
    }
}

/// What an authorized command asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Assign reviewers and mark the change awaiting review
    AssignReviewers(Vec<String>),
    /// Approve on behalf of these reviewers
    Approve(Vec<String>),
    /// Withdraw the approval
    Withdraw,
}

/// Decide whether `sender` may run `command` on a change opened by `opener`.
///
/// Returns `None` for commands addressed to another bot or not permitted.
pub fn authorize(
    command: Command,
    botname: &str,
    settings: &RepositorySettings,
    sender: &str,
    opener: &str,
) -> Option<Action> {
    if command.bot_name().is_some_and(|bot| bot != botname) {
        debug!(bot = ?command.bot_name(), "command addressed to another bot");
        return None;
    }

    match command {
        Command::AssignReviewer { reviewers } => Some(Action::AssignReviewers(reviewers)),
        Command::AcceptByReviewer { .. } => settings
            .is_reviewer(sender)
            .then(|| Action::Approve(vec![sender.to_string()])),
        Command::AcceptByOthers { reviewers, .. } => {
            let reviewers = resolve_reviewers(&reviewers, sender);
            let by_reviewer = settings.is_reviewer(sender);
            let by_author = settings.is_mergeable_user(sender)
                && sender == opener
                && !reviewers.iter().any(|r| r == sender);
            (by_reviewer || by_author).then_some(Action::Approve(reviewers))
        }
        Command::Withdraw { .. } => settings.is_reviewer(sender).then_some(Action::Withdraw),
    }
}

/// Route one webhook event to the merge engine
pub async fn dispatch(state: &AppState, event: WebhookEvent) -> Result<()> {
    match event {
        WebhookEvent::IssueComment(e) => on_issue_comment(state, e).await,
        WebhookEvent::Push(e) => on_push(state, e).await,
        WebhookEvent::Status(e) => {
            let settings = state.settings.repository(&e.repository.id());
            let on_branch = e.branches.is_empty()
                || e.branches.iter().any(|b| b.name == settings.integration_branch);
            on_ci_signal(state, &settings, &e.sha, &e.state, on_branch).await
        }
        WebhookEvent::CheckSuite(e) => {
            if e.action != "completed" {
                return Ok(());
            }
            let settings = state.settings.repository(&e.repository.id());
            let on_branch = e
                .check_suite
                .head_branch
                .as_ref()
                .is_none_or(|b| *b == settings.integration_branch);
            let conclusion = e.check_suite.conclusion.unwrap_or_default();
            on_ci_signal(state, &settings, &e.check_suite.head_sha, &conclusion, on_branch).await
        }
        WebhookEvent::PullRequest(e) => {
            if e.action != "closed" {
                return Ok(());
            }
            let repo = e.repository.id();
            debug!(%repo, change = e.number, "change closed, clearing status labels");
            state.platform.set_status_label(&repo, e.number, None).await
        }
        WebhookEvent::Ping(_) => {
            info!("ping received");
            Ok(())
        }
        WebhookEvent::Other(kind) => {
            debug!(%kind, "ignoring event");
            Ok(())
        }
    }
}

async fn on_issue_comment(state: &AppState, event: IssueCommentEvent) -> Result<()> {
    if event.action != "created" || event.issue.pull_request.is_none() {
        return Ok(());
    }

    let command = match parse_command(&event.comment.body) {
        Ok(command) => command,
        Err(Error::Parse(reason)) => {
            debug!(%reason, "comment is not a command");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let repo = event.repository.id();
    let change = event.issue.number;
    let settings = state.settings.repository(&repo);
    let sender = event.sender.login.as_str();

    let Some(action) = authorize(
        command,
        &state.settings.botname,
        &settings,
        sender,
        &event.issue.user.login,
    ) else {
        info!(%repo, change, sender, "command not permitted");
        return Ok(());
    };

    info!(%repo, change, sender, ?action, "running command");
    let orchestrator = &state.orchestrator;
    match action {
        Action::AssignReviewers(reviewers) => {
            state
                .platform
                .add_assignees(&repo, change, &reviewers)
                .await?;
            state
                .platform
                .set_status_label(&repo, change, Some(StatusLabel::AwaitingReview))
                .await
        }
        Action::Approve(reviewers) => orchestrator.approve(&settings, change, &reviewers).await,
        Action::Withdraw => orchestrator.withdraw(&settings, change, sender).await,
    }
}

async fn on_ci_signal(
    state: &AppState,
    settings: &RepositorySettings,
    sha: &str,
    conclusion: &str,
    on_integration_branch: bool,
) -> Result<()> {
    if !settings.auto_merge || !on_integration_branch {
        return Ok(());
    }
    let Some(status) = CiStatus::from_conclusion(conclusion) else {
        debug!(sha, conclusion, "CI still running");
        return Ok(());
    };
    state
        .orchestrator
        .on_external_result(settings, sha, status)
        .await
}

async fn on_push(state: &AppState, event: PushEvent) -> Result<()> {
    let repo = event.repository.id();
    let settings = state.settings.repository(&repo);
    let Some(branch) = event.git_ref.strip_prefix("refs/heads/") else {
        return Ok(());
    };
    if branch != settings.trunk {
        return Ok(());
    }

    detect_unmergeable(
        Arc::clone(&state.platform),
        state.orchestrator.oracle(),
        &repo,
        &settings.trunk,
        event.compare.as_deref(),
    )
    .await?;
    Ok(())
}
