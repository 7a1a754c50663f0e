//! Version-control port backed by the `git` command line.

use std::path::Path;
use tokio::process::Command;
use tracing::debug;
use warden_core::{CommitInfo, FileStatus, VcsError, VersionControl};

#[derive(Debug, Default, Clone, Copy)]
pub struct GitCli;

async fn git_output(root: &Path, args: &[&str]) -> Result<std::process::Output, VcsError> {
    debug!(root = %root.display(), ?args, "git");
    Ok(Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .await?)
}

async fn git(root: &Path, args: &[&str]) -> Result<String, VcsError> {
    let output = git_output(root, args).await?;
    if !output.status.success() {
        return Err(VcsError::CommandFailed {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn with_paths<'a>(args: &[&'a str], paths: &'a [String]) -> Vec<&'a str> {
    let mut all = args.to_vec();
    all.push("--");
    all.extend(paths.iter().map(String::as_str));
    all
}

/// Parse `git status --porcelain -z` output.
fn parse_status(raw: &str) -> Vec<FileStatus> {
    let mut entries = raw.split('\0').filter(|e| !e.is_empty());
    let mut files = Vec::new();
    while let Some(entry) = entries.next() {
        if entry.len() < 4 {
            continue;
        }
        let (code, path) = entry.split_at(2);
        // Renames and copies are followed by their original path.
        if code.starts_with('R') || code.starts_with('C') {
            entries.next();
        }
        files.push(FileStatus {
            path: path[1..].to_string(),
            code: code.to_string(),
            untracked: code == "??",
        });
    }
    files
}

impl GitCli {
    async fn has_head(&self, root: &Path) -> bool {
        git(root, &["rev-parse", "--verify", "--quiet", "HEAD"])
            .await
            .is_ok()
    }
}

#[async_trait::async_trait]
impl VersionControl for GitCli {
    async fn is_repository(&self, root: &Path) -> bool {
        if !root.is_dir() {
            return false;
        }
        matches!(
            git(root, &["rev-parse", "--is-inside-work-tree"]).await,
            Ok(out) if out.trim() == "true"
        )
    }

    async fn status(&self, root: &Path) -> Result<Vec<FileStatus>, VcsError> {
        if !self.is_repository(root).await {
            return Err(VcsError::NotARepository(root.to_path_buf()));
        }
        // Porcelain paths are relative to the repository top level even when
        // `root` is a subdirectory of it.
        let prefix = git(root, &["rev-parse", "--show-prefix"]).await?;
        let prefix = prefix.trim();
        let raw = git(root, &["status", "--porcelain", "-z", "-uall", "--", "."]).await?;
        Ok(parse_status(&raw)
            .into_iter()
            .map(|mut file| {
                if let Some(rest) = file.path.strip_prefix(prefix) {
                    file.path = rest.to_string();
                }
                file
            })
            .collect())
    }

    async fn diff(&self, root: &Path, paths: &[String]) -> Result<String, VcsError> {
        let base: &[&str] = if self.has_head(root).await {
            &["diff", "HEAD"]
        } else {
            &["diff", "--cached"]
        };
        let scope = [".".to_string()];
        let pathspec = if paths.is_empty() { &scope[..] } else { paths };
        let mut out = git(root, &with_paths(base, pathspec)).await?;

        // Untracked files have no index entry; diff them against nothing.
        let untracked = self
            .status(root)
            .await?
            .into_iter()
            .filter(|s| s.untracked && (paths.is_empty() || paths.contains(&s.path)));
        for file in untracked {
            let output = git_output(
                root,
                &["diff", "--no-index", "--", "/dev/null", file.path.as_str()],
            )
            .await?;
            // Exit status 1 means "differences found".
            if output.status.code().is_some_and(|c| c <= 1) {
                out.push_str(&String::from_utf8_lossy(&output.stdout));
            }
        }
        Ok(out)
    }

    async fn create_branch(&self, root: &Path, name: &str) -> Result<(), VcsError> {
        git(root, &["branch", name]).await.map(drop)
    }

    async fn delete_branch(&self, root: &Path, name: &str) -> Result<(), VcsError> {
        git(root, &["branch", "-D", name]).await.map(drop)
    }

    async fn commit_paths(
        &self,
        root: &Path,
        paths: &[String],
        message: &str,
    ) -> Result<CommitInfo, VcsError> {
        if paths.is_empty() {
            return Err(VcsError::NothingToCommit);
        }
        git(root, &with_paths(&["add", "-A"], paths)).await?;
        let staged = git_output(root, &with_paths(&["diff", "--cached", "--quiet"], paths)).await?;
        if staged.status.success() {
            return Err(VcsError::NothingToCommit);
        }
        git(root, &with_paths(&["commit", "-q", "-m", message], paths)).await?;
        let sha = git(root, &["rev-parse", "HEAD"]).await?.trim().to_string();
        Ok(CommitInfo {
            sha,
            message: message.to_string(),
            files: paths.to_vec(),
        })
    }

    async fn head(&self, root: &Path) -> Result<Option<String>, VcsError> {
        if !self.has_head(root).await {
            return Ok(None);
        }
        Ok(Some(git(root, &["rev-parse", "HEAD"]).await?.trim().to_string()))
    }

    async fn discard_untracked(&self, root: &Path) -> Result<Vec<String>, VcsError> {
        let out = git(root, &["clean", "-fd"]).await?;
        Ok(out
            .lines()
            .filter_map(|l| l.strip_prefix("Removing "))
            .map(|p| p.trim_end_matches('/').to_string())
            .collect())
    }
}
