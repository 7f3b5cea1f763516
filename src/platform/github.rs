//! GitHub platform service implementation

use crate::error::{Error, Result};
use crate::platform::PlatformService;
use crate::types::{ChangeDetails, ChangeId, ChangeState, MergeResult, RepoId, StatusLink};
use async_trait::async_trait;
use octocrab::Octocrab;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

/// Public GitHub API endpoint
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

#[derive(Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Deserialize)]
struct CombinedStatus {
    #[serde(default)]
    statuses: Vec<CommitStatus>,
}

#[derive(Deserialize)]
struct CommitStatus {
    description: Option<String>,
    target_url: Option<String>,
}

/// GitHub service using octocrab for pulls and issues, raw HTTP for git refs
/// and the combined status API
pub struct GitHubService {
    client: Octocrab,
    /// Token for raw HTTP requests
    token: String,
    /// HTTP client for raw requests
    http_client: Client,
    /// API base URL without trailing slash
    api_base: String,
}

impl GitHubService {
    /// Create a new GitHub service.
    ///
    /// `base_url` points at a GitHub Enterprise API (`https://host/api/v3`);
    /// `None` uses github.com.
    pub fn new(token: &str, base_url: Option<&str>) -> Result<Self> {
        let mut builder = Octocrab::builder().personal_token(token.to_string());

        let api_base = match base_url {
            Some(url) => {
                let url = url.trim_end_matches('/');
                builder = builder
                    .base_uri(url)
                    .map_err(|e| Error::GitHubApi(e.to_string()))?;
                url.to_string()
            }
            None => DEFAULT_API_BASE.to_string(),
        };

        let client = builder
            .build()
            .map_err(|e| Error::GitHubApi(e.to_string()))?;

        let http_client = Client::builder()
            .user_agent(concat!("rplus/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::GitHubApi(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            token: token.to_string(),
            http_client,
            api_base,
        })
    }

    fn repo_url(&self, repo: &RepoId, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{path}",
            self.api_base, repo.owner, repo.name
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Delete `refs/heads/<branch>`. A missing branch is not an error.
    async fn delete_head_ref(&self, repo: &RepoId, branch: &str) -> Result<bool> {
        let url = self.repo_url(repo, &format!("git/refs/heads/{branch}"));
        let response = self
            .request(reqwest::Method::DELETE, &url)
            .send()
            .await
            .map_err(|e| Error::GitHubApi(format!("Failed to delete branch {branch}: {e}")))?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
                debug!(%repo, branch, "branch did not exist");
                Ok(false)
            }
            _ => Err(api_error(response, &format!("delete branch {branch}")).await),
        }
    }
}

async fn api_error(response: Response, action: &str) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Error::GitHubApi(format!("Failed to {action}: {status} {body}"))
}

/// Helper to convert an octocrab PR to our `ChangeDetails` type
fn change_from_octocrab(pr: &octocrab::models::pulls::PullRequest) -> ChangeDetails {
    let state = match pr.state {
        Some(octocrab::models::IssueState::Open) => ChangeState::Open,
        Some(octocrab::models::IssueState::Closed) if pr.merged_at.is_some() => {
            ChangeState::Merged
        }
        // IssueState is non-exhaustive
        Some(_) | None => ChangeState::Closed,
    };

    ChangeDetails {
        number: pr.number,
        head_sha: pr.head.sha.clone(),
        state,
        base_ref: pr.base.ref_field.clone(),
        head_ref: pr.head.ref_field.clone(),
        head_repo: pr
            .head
            .repo
            .as_ref()
            .and_then(|r| r.full_name.as_deref())
            .and_then(RepoId::parse),
        mergeable: pr.mergeable,
        labels: pr
            .labels
            .iter()
            .flatten()
            .map(|l| l.name.clone())
            .collect(),
        html_url: pr
            .html_url
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default(),
    }
}

#[async_trait]
impl PlatformService for GitHubService {
    async fn fetch_change(&self, repo: &RepoId, change: ChangeId) -> Result<ChangeDetails> {
        debug!(%repo, change, "fetching change");
        let pr = self
            .client
            .pulls(&repo.owner, &repo.name)
            .get(change)
            .await?;

        let details = change_from_octocrab(&pr);
        debug!(%repo, change, state = %details.state, head = %details.head_sha, "fetched change");
        Ok(details)
    }

    async fn build_integration_branch(
        &self,
        repo: &RepoId,
        change: ChangeId,
        branch: &str,
    ) -> Result<String> {
        debug!(%repo, change, branch, "building integration branch");
        self.delete_head_ref(repo, branch).await?;

        let url = self.repo_url(repo, &format!("git/refs/pull/{change}/merge"));
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| Error::GitHubApi(format!("Failed to fetch merge ref: {e}")))?;
        if !response.status().is_success() {
            return Err(api_error(response, &format!("fetch merge ref of #{change}")).await);
        }
        let merge_ref: GitRef = response
            .json()
            .await
            .map_err(|e| Error::GitHubApi(format!("Failed to parse merge ref: {e}")))?;
        let tip = merge_ref.object.sha;

        let url = self.repo_url(repo, "git/refs");
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&serde_json::json!({
                "ref": format!("refs/heads/{branch}"),
                "sha": tip,
            }))
            .send()
            .await
            .map_err(|e| Error::GitHubApi(format!("Failed to create branch: {e}")))?;
        if !response.status().is_success() {
            return Err(api_error(response, &format!("create branch {branch}")).await);
        }

        debug!(%repo, change, branch, %tip, "built integration branch");
        Ok(tip)
    }

    async fn merge_change(
        &self,
        repo: &RepoId,
        change: ChangeId,
        required_head: &str,
    ) -> Result<MergeResult> {
        debug!(%repo, change, required_head, "merging change");

        // `sha` makes GitHub refuse the merge if the head moved.
        let result = self
            .client
            .pulls(&repo.owner, &repo.name)
            .merge(change)
            .sha(required_head)
            .method(octocrab::params::pulls::MergeMethod::Merge)
            .send()
            .await
            .map_err(|e| Error::GitHubApi(format!("Merge failed: {e}")))?;

        let merge_result = MergeResult {
            merged: result.merged,
            sha: result.sha,
            message: result.message,
        };

        debug!(
            %repo,
            change,
            merged = merge_result.merged,
            sha = ?merge_result.sha,
            "merge complete"
        );
        Ok(merge_result)
    }

    async fn delete_branch(&self, repo: &RepoId, branch: &str) -> Result<()> {
        debug!(%repo, branch, "deleting branch");
        self.delete_head_ref(repo, branch).await?;
        Ok(())
    }

    async fn notify(&self, repo: &RepoId, change: ChangeId, body: &str) -> Result<()> {
        debug!(%repo, change, "creating comment");
        self.client
            .issues(&repo.owner, &repo.name)
            .create_comment(change, body)
            .await?;
        Ok(())
    }

    async fn replace_labels(
        &self,
        repo: &RepoId,
        change: ChangeId,
        labels: &[String],
    ) -> Result<()> {
        debug!(%repo, change, ?labels, "replacing labels");
        self.client
            .issues(&repo.owner, &repo.name)
            .replace_all_labels(change, labels)
            .await?;
        Ok(())
    }

    async fn list_open_changes(&self, repo: &RepoId, base: &str) -> Result<Vec<ChangeDetails>> {
        debug!(%repo, base, "listing open changes");
        let page = self
            .client
            .pulls(&repo.owner, &repo.name)
            .list()
            .state(octocrab::params::State::Open)
            .base(base)
            .per_page(100)
            .send()
            .await?;
        let prs = self.client.all_pages(page).await?;

        let result: Vec<ChangeDetails> = prs.iter().map(change_from_octocrab).collect();
        debug!(%repo, count = result.len(), "listed open changes");
        Ok(result)
    }

    async fn status_links(&self, repo: &RepoId, reference: &str) -> Result<Vec<StatusLink>> {
        let url = self.repo_url(repo, &format!("commits/{reference}/status"));
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| Error::GitHubApi(format!("Failed to fetch commit status: {e}")))?;

        if !response.status().is_success() {
            return Err(api_error(response, &format!("fetch status of {reference}")).await);
        }

        let status: CombinedStatus = response
            .json()
            .await
            .map_err(|e| Error::GitHubApi(format!("Failed to parse commit status: {e}")))?;

        let links: Vec<StatusLink> = status
            .statuses
            .into_iter()
            .filter_map(|s| {
                let target_url = s.target_url.filter(|u| !u.is_empty())?;
                Some(StatusLink {
                    description: s.description.filter(|d| !d.is_empty()),
                    target_url,
                })
            })
            .collect();
        debug!(%repo, reference, count = links.len(), "fetched status links");
        Ok(links)
    }

    async fn add_assignees(
        &self,
        repo: &RepoId,
        change: ChangeId,
        users: &[String],
    ) -> Result<()> {
        debug!(%repo, change, ?users, "assigning reviewers");
        let users: Vec<&str> = users.iter().map(String::as_str).collect();
        self.client
            .issues(&repo.owner, &repo.name)
            .add_assignees(change, &users)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn repo() -> RepoId {
        RepoId::new("octo", "widgets")
    }

    #[tokio::test]
    async fn test_build_integration_branch_resets_branch_to_merge_ref() {
        let mut server = mockito::Server::new_async().await;
        let delete = server
            .mock("DELETE", "/repos/octo/widgets/git/refs/heads/auto")
            .with_status(204)
            .create_async()
            .await;
        let get = server
            .mock("GET", "/repos/octo/widgets/git/refs/pull/42/merge")
            .with_status(200)
            .with_body(r#"{"ref":"refs/pull/42/merge","object":{"sha":"tip42","type":"commit"}}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/repos/octo/widgets/git/refs")
            .match_body(Matcher::Json(serde_json::json!({
                "ref": "refs/heads/auto",
                "sha": "tip42",
            })))
            .with_status(201)
            .with_body(r#"{"ref":"refs/heads/auto","object":{"sha":"tip42"}}"#)
            .create_async()
            .await;

        let service = GitHubService::new("token", Some(&server.url())).unwrap();
        let tip = service
            .build_integration_branch(&repo(), 42, "auto")
            .await
            .unwrap();

        assert_eq!(tip, "tip42");
        delete.assert_async().await;
        get.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_build_integration_branch_tolerates_missing_branch() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/repos/octo/widgets/git/refs/heads/auto")
            .with_status(422)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/octo/widgets/git/refs/pull/7/merge")
            .with_status(200)
            .with_body(r#"{"object":{"sha":"t7"}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/repos/octo/widgets/git/refs")
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;

        let service = GitHubService::new("token", Some(&server.url())).unwrap();
        let tip = service
            .build_integration_branch(&repo(), 7, "auto")
            .await
            .unwrap();
        assert_eq!(tip, "t7");
    }

    #[tokio::test]
    async fn test_build_integration_branch_fails_without_merge_ref() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/repos/octo/widgets/git/refs/heads/auto")
            .with_status(204)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/octo/widgets/git/refs/pull/9/merge")
            .with_status(404)
            .with_body(r#"{"message":"Not Found"}"#)
            .create_async()
            .await;

        let service = GitHubService::new("token", Some(&server.url())).unwrap();
        let err = service
            .build_integration_branch(&repo(), 9, "auto")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::GitHubApi(msg) if msg.contains("404")));
    }

    #[tokio::test]
    async fn test_delete_branch_reports_server_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/repos/octo/widgets/git/refs/heads/feature")
            .with_status(500)
            .create_async()
            .await;

        let service = GitHubService::new("token", Some(&server.url())).unwrap();
        assert!(service.delete_branch(&repo(), "feature").await.is_err());
    }

    #[tokio::test]
    async fn test_status_links_skip_entries_without_url() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/octo/widgets/commits/auto/status")
            .match_header("authorization", "Bearer token")
            .with_status(200)
            .with_body(
                r#"{
                  "state": "failure",
                  "statuses": [
                    {"state": "failure", "description": "build", "target_url": "https://ci/1"},
                    {"state": "success", "description": "", "target_url": "https://ci/2"},
                    {"state": "success", "description": "lint", "target_url": null}
                  ]
                }"#,
            )
            .create_async()
            .await;

        let service = GitHubService::new("token", Some(&server.url())).unwrap();
        let links = service.status_links(&repo(), "auto").await.unwrap();

        assert_eq!(
            links,
            vec![
                StatusLink {
                    description: Some("build".to_string()),
                    target_url: "https://ci/1".to_string(),
                },
                StatusLink {
                    description: None,
                    target_url: "https://ci/2".to_string(),
                },
            ]
        );
    }
}
