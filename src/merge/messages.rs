//! Comment texts posted on changes

use crate::types::StatusLink;
use std::fmt::Write;

/// Approval acknowledged
pub fn approved(head: &str, reviewers: &[String]) -> String {
    let reviewers: Vec<String> = reviewers.iter().map(|r| format!("`{r}`")).collect();
    format!(
        ":pushpin: Commit {head} has been approved by {}",
        reviewers.join(", ")
    )
}

/// Approval queued behind other work
pub fn queued() -> String {
    ":postbox: This pull request is queued. Please wait.".to_string()
}

/// Candidate merged into a fresh integration branch
pub fn testing(head: &str, branch: &str, tip: &str) -> String {
    format!(":hourglass: {head} has been merged into the integration branch `{branch}` ({tip})")
}

/// Head moved after approval
pub fn head_changed() -> String {
    ":no_entry_sign: The current head is changed from when this had been accepted. \
     Please review again."
        .to_string()
}

/// Candidate conflicts with trunk
pub fn merge_conflict() -> String {
    ":lock: Merge conflict".to_string()
}

/// Integration branch could not be built for the change
pub fn integration_failed(branch: &str, reason: &str) -> String {
    format!(
        ":lock: Could not merge this pull request into `{branch}` with the latest trunk. \
         Please rebase.\n```\n{reason}\n```"
    )
}

/// CI passed on the integration branch and the change was merged
pub fn merged(links: &[StatusLink]) -> String {
    with_links(
        ":tada: Tests passed. This pull request has been merged.".to_string(),
        links,
    )
}

/// CI failed on the integration branch
pub fn tests_failed(conclusion: &str, links: &[StatusLink]) -> String {
    with_links(format!(":collision: Tests failed ({conclusion})"), links)
}

/// Merge API refused the merge
pub fn merge_failed(reason: &str) -> String {
    format!(":skull: Could not merge this pull request by:\n```\n{reason}\n```")
}

/// Approval withdrawn
pub fn cancelled(sender: &str) -> String {
    format!(":outbox_tray: This has been cancelled from the approved queue by `{sender}`")
}

/// A trunk push made the change unmergeable
pub fn unmergeable_after_push(compare_url: Option<&str>) -> String {
    let culprit = compare_url.map_or_else(String::new, |url| format!(" (presumably [these]({url}))"));
    format!(
        ":umbrella: The latest upstream change{culprit} made this pull request unmergeable. \
         Please resolve the merge conflicts."
    )
}

fn with_links(mut text: String, links: &[StatusLink]) -> String {
    if links.is_empty() {
        return text;
    }
    text.push('\n');
    for link in links {
        let title = link.description.as_deref().unwrap_or("details");
        let _ = write!(text, "\n* [{title}]({})", link.target_url);
    }
    text
}
