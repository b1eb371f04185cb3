//! Local analysis of a cloned repository.
//!
//! The clone is made lazily by the first task that needs it, into a temporary
//! directory removed when the workspace is dropped. A run without clone tasks
//! never touches the network for it.

mod git;

use crate::Result;
use core::time::Duration;
use ohno::IntoAppError;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::sync::OnceCell;
use url::Url;

pub(crate) const LOG_TARGET: &str = "     clone";

#[derive(Debug)]
struct Checkout {
    repo_path: PathBuf,
    _dir: TempDir,
}

/// A lazily cloned checkout of one repository.
#[derive(Debug)]
pub struct CloneWorkspace {
    repo_url: Url,
    timeout: Duration,
    checkout: OnceCell<Checkout>,
}

impl CloneWorkspace {
    #[must_use]
    pub const fn new(repo_url: Url, timeout: Duration) -> Self {
        Self {
            repo_url,
            timeout,
            checkout: OnceCell::const_new(),
        }
    }

    /// Build the clone URL of `owner/name` beneath `base` (e.g. `https://github.com/`).
    pub fn for_repository(base: &Url, owner: &str, name: &str, timeout: Duration) -> Result<Self> {
        let repo_url = base
            .join(&format!("{owner}/{name}.git"))
            .into_app_err_with(|| format!("invalid clone URL for '{owner}/{name}'"))?;
        Ok(Self::new(repo_url, timeout))
    }

    #[must_use]
    pub const fn repo_url(&self) -> &Url {
        &self.repo_url
    }

    /// Whether the repository has been cloned yet.
    #[must_use]
    pub fn is_cloned(&self) -> bool {
        self.checkout.initialized()
    }

    /// Path of the checkout, cloning on first use.
    pub async fn path(&self) -> Result<&Path> {
        let checkout = self
            .checkout
            .get_or_try_init(|| async {
                let dir = tempfile::Builder::new()
                    .prefix("gh-harvest-")
                    .tempdir()
                    .into_app_err("could not create a temporary directory for the clone")?;
                let repo_path = dir.path().join("repo");
                git::clone_repo(&repo_path, &self.repo_url, self.timeout).await?;
                Ok::<_, ohno::AppError>(Checkout { repo_path, _dir: dir })
            })
            .await?;

        Ok(&checkout.repo_path)
    }

    /// Commit statistics of the default branch.
    pub async fn commit_stats(&self) -> Result<Value> {
        let path = self.path().await?;

        let commits = git::count_commits(path, self.timeout).await?;
        let authors = git::count_contributors(path, self.timeout).await?;
        let range = git::commit_date_range(path, self.timeout).await?;

        Ok(json!({
            "commits": {
                "totalCount": commits,
                "authors": authors,
                "firstCommitAt": range.map(|(first, _)| first.to_rfc3339()),
                "latestCommitAt": range.map(|(_, latest)| latest.to_rfc3339()),
            }
        }))
    }
}
