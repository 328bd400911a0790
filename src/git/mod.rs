//! Shell-level git operations for branch rebasing.
//!
//! The rebase flow drives one temporary shallow clone per attempt:
//! clone -> fetch trunk -> rebase -> force push -> remove. [`session`] owns
//! that sequence; this module owns the command runner and the classification
//! of rebase failures.
//!
//! Rebase errors are the sole git failure with a structured type
//! ([`RebaseError`]) because the branch controller must choose between
//! "notify and abort" and "treat as still in progress". Everything else is an
//! opaque [`GitError::CommandFailed`] left to the caller's retry policy.

pub mod session;

use std::path::Path;
use std::process::Output;

use thiserror::Error;

/// Exit code git uses for "a rebase is already in progress" (and other
/// fatal repository-state errors).
const EXIT_FATAL: i32 = 128;

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command failed in a way that carries no domain meaning.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Rebase stopped on a conflict or found one already in progress.
    #[error(transparent)]
    Rebase(#[from] RebaseError),

    /// IO error (spawning git, removing the clone).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// A classified rebase failure.
///
/// `in_progress` distinguishes "this commit conflicted" from "the clone is
/// already mid-rebase"; both abort the flow and trigger a conflict warning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rebase stopped at {sha}: {message}")]
pub struct RebaseError {
    /// Short SHA of the commit the rebase could not apply.
    pub sha: String,

    /// The commit subject reported by git.
    pub message: String,

    /// True when git reported a rebase already in progress.
    pub in_progress: bool,
}

/// Committer identity used inside temp clones, where no user config exists.
const IDENT_NAME: &str = "repo-warden";
const IDENT_EMAIL: &str = "repo-warden@localhost";

/// Create a git command with a clean environment (no system/user config).
///
/// This keeps behavior consistent across worker hosts by ignoring system and
/// user git configuration (rerere, hooks, aliases) and disabling prompts.
/// With user config gone there is no ident fallback either, and a rebase
/// that creates commits dies with exit 128 ("Committer identity unknown"),
/// so a fixed identity is pinned here. Replayed commits keep their original
/// author: the rebase sequencer sets the author explicitly per commit.
pub(crate) fn git_command(workdir: &Path) -> std::process::Command {
    let mut cmd = std::process::Command::new("git");
    cmd.current_dir(workdir);
    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd.env("GIT_AUTHOR_NAME", IDENT_NAME);
    cmd.env("GIT_AUTHOR_EMAIL", IDENT_EMAIL);
    cmd.env("GIT_COMMITTER_NAME", IDENT_NAME);
    cmd.env("GIT_COMMITTER_EMAIL", IDENT_EMAIL);
    cmd
}

/// Run a git command in the given working directory.
///
/// Returns the command output on success, or a [`GitError`] on failure.
pub(crate) fn run_git(workdir: &Path, args: &[&str]) -> GitResult<Output> {
    let output = git_command(workdir).args(args).output()?;

    if output.status.success() {
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let command = format!("git {}", args.join(" "));
        Err(GitError::CommandFailed { command, stderr })
    }
}

/// Classifies the output of `git rebase`.
///
/// - exit 0: clean rebase
/// - exit 1 with a `Could not apply <sha>... <msg>` line: conflict, with the
///   exact sha and message extracted
/// - exit 128: a rebase is already in progress in this clone
/// - anything else: opaque failure, eligible for retry
pub(crate) fn classify_rebase(branch: &str, after: &str, output: &Output) -> GitResult<()> {
    if output.status.success() {
        return Ok(());
    }

    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    match output.status.code() {
        Some(1) => {
            if let Some((sha, message)) = parse_could_not_apply(&combined) {
                return Err(RebaseError {
                    sha,
                    message,
                    in_progress: false,
                }
                .into());
            }

            Err(GitError::CommandFailed {
                command: format!("git rebase {after}"),
                stderr: combined,
            })
        }
        Some(EXIT_FATAL) => Err(RebaseError {
            sha: "unknown".to_string(),
            message: format!("error rebasing branch {branch}"),
            in_progress: true,
        }
        .into()),
        _ => Err(GitError::CommandFailed {
            command: format!("git rebase {after}"),
            stderr: combined,
        }),
    }
}

/// Extracts `(sha, message)` from a `Could not apply <sha>... <msg>` line.
///
/// The sha is the short (7+ hex characters) commit id git prints before the
/// literal `...` separator.
fn parse_could_not_apply(output: &str) -> Option<(String, String)> {
    for line in output.lines() {
        // Older gits print "Could not apply <sha>... <msg>"; newer ones
        // prefix it with "error: " and lowercase the first word.
        let Some(rest) = line
            .strip_prefix("Could not apply ")
            .or_else(|| line.strip_prefix("error: could not apply "))
        else {
            continue;
        };
        let Some((sha, message)) = rest.split_once("... ") else {
            continue;
        };

        if sha.len() >= 7 && sha.chars().all(|c| c.is_ascii_hexdigit()) {
            return Some((sha.to_string(), message.to_string()));
        }
    }

    None
}
