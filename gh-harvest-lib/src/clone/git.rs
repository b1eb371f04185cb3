use super::LOG_TARGET;
use crate::Result;
use chrono::{DateTime, Utc};
use core::time::Duration;
use ohno::{IntoAppError, bail};
use std::collections::HashSet;
use std::path::Path;
use tokio::process::Command;
use url::Url;

/// Partial clone of the default branch: full history, no file contents.
pub async fn clone_repo(repo_path: &Path, repo_url: &Url, timeout: Duration) -> Result<()> {
    let path_str = repo_path.to_str().into_app_err("invalid UTF-8 in repository path")?;
    let start_time = std::time::Instant::now();

    log::info!(target: LOG_TARGET, "Cloning repository '{repo_url}'");
    let output = run_git_with_timeout(
        &[
            "clone",
            "--filter=blob:none",
            "--single-branch",
            "--no-tags",
            "--no-checkout",
            repo_url.as_str(),
            path_str,
        ],
        timeout,
    )
    .await?;
    check_git_output(&output, "git clone")?;

    log::debug!(target: LOG_TARGET, "Cloned '{repo_url}' in {:.3}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

fn check_git_output(output: &std::process::Output, operation: &str) -> Result<()> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{operation} failed: {stderr}");
    }
    Ok(())
}

async fn git_stdout(repo_path: &Path, args: &[&str], timeout: Duration, operation: &str) -> Result<String> {
    let path_str = repo_path.to_str().into_app_err("invalid UTF-8 in repository path")?;

    let mut full_args = vec!["-C", path_str];
    full_args.extend_from_slice(args);

    let output = run_git_with_timeout(&full_args, timeout).await?;
    check_git_output(&output, operation)?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Count unique commit authors on the cloned branch.
pub async fn count_contributors(repo_path: &Path, timeout: Duration) -> Result<u64> {
    // %ae = author email (respecting .mailmap)
    let stdout = git_stdout(repo_path, &["log", "--format=%ae"], timeout, "git log").await?;
    Ok(count_unique_lines(&stdout))
}

/// Number of commits reachable from HEAD.
pub async fn count_commits(repo_path: &Path, timeout: Duration) -> Result<u64> {
    let stdout = git_stdout(repo_path, &["rev-list", "--count", "HEAD"], timeout, "git rev-list").await?;
    parse_commit_count(&stdout)
}

fn parse_commit_count(stdout: &str) -> Result<u64> {
    let count = stdout.trim();
    count
        .parse::<u64>()
        .into_app_err_with(|| format!("unable to parse commit count from '{count}'"))
}

/// Committer date of the first and the latest commit on HEAD.
pub async fn commit_date_range(repo_path: &Path, timeout: Duration) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
    let stdout = git_stdout(repo_path, &["log", "--format=%cI"], timeout, "git log").await?;
    Ok(parse_date_range(&stdout))
}

fn count_unique_lines(stdout: &str) -> u64 {
    let unique: HashSet<&str> = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    unique.len() as u64
}

/// `git log` lists newest first; the last parsable line is the first commit.
fn parse_date_range(stdout: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let mut dates = stdout
        .lines()
        .filter_map(|line| DateTime::parse_from_rfc3339(line.trim()).ok())
        .map(|d| d.with_timezone(&Utc));

    let latest = dates.next()?;
    let first = dates.last().unwrap_or(latest);
    Some((first, latest))
}

async fn run_git_with_timeout(args: &[&str], timeout: Duration) -> Result<std::process::Output> {
    let child = Command::new("git")
        .args(args)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .into_app_err("could not spawn git command")?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(e).into_app_err_with(|| format!("'git {}' failed to run", args.join(" "))),
        Err(_) => {
            bail!("'git {}' timed out after {} seconds", args.join(" "), timeout.as_secs());
        }
    }
}
