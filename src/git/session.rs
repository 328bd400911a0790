//! A git session: one temporary clone driven through the rebase flow.
//!
//! The branch controller opens a session per rebase attempt. All steps share
//! the clone on disk, so the whole session runs inside one task (the
//! in-process equivalent of pinning the activity group to one worker). The
//! clone is removed on every exit path; [`GitSession::remove`] is idempotent
//! and tolerates an already-absent path.
//!
//! Git subprocesses are synchronous and run under `spawn_blocking`.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::{GitError, GitResult, classify_rebase, run_git};
use crate::types::Sha;

/// A temporary clone of one branch, plus the refs fetched into it.
#[derive(Debug)]
pub struct GitSession {
    path: PathBuf,
    branch: String,
    default_branch: String,
}

/// Builds a unique clone path under `base_dir`.
///
/// Branch names may contain `/`; flatten them so the clone stays a single
/// directory level.
fn clone_path(base_dir: &Path, branch: &str) -> PathBuf {
    let flat = branch.replace('/', "-");
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    base_dir.join(format!("rebase-{flat}-{nonce}"))
}

async fn blocking_git<T, F>(op: F) -> GitResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> GitResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| GitError::Io(std::io::Error::other(e)))?
}

impl GitSession {
    /// Clones `branch` of the repository at `url` into a fresh path under
    /// `base_dir`, shallow and single-branch.
    ///
    /// `url` may embed an access token; it is never logged here.
    pub async fn clone_branch(
        base_dir: &Path,
        url: &str,
        branch: &str,
        default_branch: &str,
    ) -> GitResult<Self> {
        let path = clone_path(base_dir, branch);
        std::fs::create_dir_all(base_dir)?;

        let session = GitSession {
            path: path.clone(),
            branch: branch.to_string(),
            default_branch: default_branch.to_string(),
        };

        let base = base_dir.to_path_buf();
        let url = url.to_string();
        let branch_arg = branch.to_string();
        let target = path
            .to_str()
            .ok_or_else(|| GitError::Io(std::io::Error::other("non-UTF-8 clone path")))?
            .to_string();

        blocking_git(move || {
            run_git(
                &base,
                &[
                    "clone",
                    "-b",
                    &branch_arg,
                    "--single-branch",
                    "--depth",
                    "1",
                    &url,
                    &target,
                ],
            )
            .map(|_| ())
        })
        .await?;

        debug!(branch, path = %path.display(), "cloned branch");

        Ok(session)
    }

    /// The on-disk path of the clone.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetches the default branch from origin into the clone.
    pub async fn fetch_trunk(&self) -> GitResult<()> {
        let path = self.path.clone();
        let trunk = self.default_branch.clone();

        blocking_git(move || run_git(&path, &["fetch", "origin", &trunk]).map(|_| ())).await
    }

    /// Rebases the checked-out branch onto the given commit.
    ///
    /// Conflicts and in-progress rebases come back as
    /// [`GitError::Rebase`]; any other failure is opaque.
    pub async fn rebase_onto(&self, after: &Sha) -> GitResult<()> {
        let path = self.path.clone();
        let branch = self.branch.clone();
        let onto = after.as_str().to_string();

        blocking_git(move || {
            let output = super::git_command(&path).args(["rebase", &onto]).output()?;
            classify_rebase(&branch, &onto, &output)
        })
        .await
    }

    /// Force-pushes the rebased branch back to origin.
    pub async fn push(&self, force: bool) -> GitResult<()> {
        let path = self.path.clone();
        let branch = self.branch.clone();

        blocking_git(move || {
            let mut args = vec!["push", "origin", branch.as_str()];
            if force {
                args.push("--force");
            }
            run_git(&path, &args).map(|_| ())
        })
        .await
    }

    /// Removes the clone from disk.
    ///
    /// Idempotent: an already-absent path is not an error. Called on every
    /// exit path of the rebase flow.
    pub async fn remove(&self) -> GitResult<()> {
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GitError::Io(e)),
        }
    }
}
