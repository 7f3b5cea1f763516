//! Settings file loading
//!
//! Settings live in a TOML file, by default `<config dir>/rplus/config.toml`.
//! Secrets may be supplied through `RPLUS_GITHUB_TOKEN` and
//! `RPLUS_WEBHOOK_SECRET` instead of the file.

use crate::error::{Error, Result};
use crate::types::RepoId;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding `github.api_token`
pub const TOKEN_ENV: &str = "RPLUS_GITHUB_TOKEN";

/// Environment variable overriding `github.webhook_secret`
pub const SECRET_ENV: &str = "RPLUS_WEBHOOK_SECRET";

const DEFAULT_BOTNAME: &str = "rplus";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_INTEGRATION_BRANCH: &str = "auto";
const DEFAULT_TRUNK: &str = "master";

/// Top-level settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Name the bot answers to in commands (`@<botname> r+`)
    #[serde(default = "default_botname")]
    pub botname: String,
    /// Port the webhook server listens on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory holding queue records
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// GitHub credentials and endpoint
    pub github: GitHubSettings,
    /// Per-repository settings
    #[serde(default)]
    pub repositories: Vec<RepositorySettings>,
}

/// GitHub connection settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitHubSettings {
    /// API token used for all calls
    #[serde(default)]
    pub api_token: String,
    /// Shared secret for webhook signatures
    #[serde(default)]
    pub webhook_secret: String,
    /// API base URL for GitHub Enterprise
    pub base_url: Option<String>,
    /// `owner/name` entries allowed to send events; empty accepts all
    #[serde(default)]
    pub accepted_repositories: Vec<String>,
}

/// Settings of one repository
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositorySettings {
    /// Repository owner
    pub owner: String,
    /// Repository name
    pub name: String,
    /// Users allowed to `r+` and `r-`
    #[serde(default)]
    pub reviewers: Vec<String>,
    /// Users allowed to `r=` their own changes
    #[serde(default)]
    pub mergeable_users: Vec<String>,
    /// Treat every commenter as a reviewer
    #[serde(default)]
    pub regard_all_as_reviewer: bool,
    /// Queue approved changes and merge them through the integration branch
    #[serde(default)]
    pub auto_merge: bool,
    /// Delete the source branch after merging
    #[serde(default)]
    pub delete_branch_after_merge: bool,
    /// Branch reset for every test run
    #[serde(default = "default_integration_branch")]
    pub integration_branch: String,
    /// Branch changes are merged into
    #[serde(default = "default_trunk")]
    pub trunk: String,
}

fn default_botname() -> String {
    DEFAULT_BOTNAME.to_string()
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir().map_or_else(|| PathBuf::from(".rplus"), |d| d.join("rplus"))
}

fn default_integration_branch() -> String {
    DEFAULT_INTEGRATION_BRANCH.to_string()
}

fn default_trunk() -> String {
    DEFAULT_TRUNK.to_string()
}

impl RepositorySettings {
    /// Defaults for a repository without a settings entry
    pub fn defaults_for(repo: &RepoId) -> Self {
        Self {
            owner: repo.owner.clone(),
            name: repo.name.clone(),
            reviewers: Vec::new(),
            mergeable_users: Vec::new(),
            regard_all_as_reviewer: false,
            auto_merge: false,
            delete_branch_after_merge: false,
            integration_branch: default_integration_branch(),
            trunk: default_trunk(),
        }
    }

    /// Repository identity
    pub fn repo_id(&self) -> RepoId {
        RepoId::new(&self.owner, &self.name)
    }

    /// Whether `user` may approve or withdraw
    pub fn is_reviewer(&self, user: &str) -> bool {
        self.regard_all_as_reviewer || self.reviewers.iter().any(|r| r == user)
    }

    /// Whether `user` is listed as a mergeable user
    pub fn is_mergeable_user(&self, user: &str) -> bool {
        self.mergeable_users.iter().any(|u| u == user)
    }
}

impl Settings {
    /// Default settings path, `None` if the platform has no config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("rplus").join("config.toml"))
    }

    /// Load, apply env overrides and validate
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

        let mut settings: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;
        settings.apply_overrides(std::env::var(TOKEN_ENV).ok(), std::env::var(SECRET_ENV).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings text without validating
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse settings: {e}")))
    }

    /// Replace the token and secret with non-empty override values
    pub fn apply_overrides(&mut self, token: Option<String>, secret: Option<String>) {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.github.api_token = token;
        }
        if let Some(secret) = secret.filter(|s| !s.is_empty()) {
            self.github.webhook_secret = secret;
        }
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.botname.is_empty() {
            return Err(Error::Config("botname must not be empty".to_string()));
        }
        if self.github.api_token.is_empty() {
            return Err(Error::Config(format!(
                "github.api_token is empty (set it or {TOKEN_ENV})"
            )));
        }
        if self.github.webhook_secret.is_empty() {
            return Err(Error::Config(format!(
                "github.webhook_secret is empty (set it or {SECRET_ENV})"
            )));
        }
        for entry in &self.github.accepted_repositories {
            if RepoId::parse(entry).is_none() {
                return Err(Error::Config(format!(
                    "accepted repository `{entry}` is not `owner/name`"
                )));
            }
        }
        for repo in &self.repositories {
            if repo.integration_branch.is_empty() || repo.integration_branch == repo.trunk {
                return Err(Error::Config(format!(
                    "{}: integration branch must be set and differ from `{}`",
                    repo.repo_id(),
                    repo.trunk
                )));
            }
        }
        Ok(())
    }

    /// Settings for `repo`, falling back to defaults
    pub fn repository(&self, repo: &RepoId) -> RepositorySettings {
        self.repositories
            .iter()
            .find(|r| r.owner == repo.owner && r.name == repo.name)
            .cloned()
            .unwrap_or_else(|| RepositorySettings::defaults_for(repo))
    }

    /// Whether events from `repo` are accepted
    pub fn is_accepted(&self, repo: &RepoId) -> bool {
        self.github.accepted_repositories.is_empty()
            || self
                .github
                .accepted_repositories
                .iter()
                .filter_map(|r| RepoId::parse(r))
                .any(|r| &r == repo)
    }
}
