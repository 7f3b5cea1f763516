//! `queue show` - print a stored queue record

use super::AppContext;
use anyhow::{Context, Result, bail};
use rplus::types::RepoId;

/// Print the raw record of `repo` (`owner/name`) to stdout
pub fn run_queue_show(ctx: &AppContext, repo: &str) -> Result<()> {
    let repo = RepoId::parse(repo).with_context(|| format!("`{repo}` is not `owner/name`"))?;
    let Some(bytes) = ctx.store.load_raw(&repo)? else {
        bail!("no queue record for {repo}");
    };
    println!("{}", String::from_utf8_lossy(&bytes));
    Ok(())
}
