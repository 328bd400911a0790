//! Durable queue-controller snapshots.
//!
//! A queue controller serializes its state when its event counter crosses the
//! restart threshold and when it shuts down cleanly, and reloads the snapshot
//! when an instance starts under the same key. Writes are atomic: temp file
//! in the target directory, fsync, rename over the final path, fsync the
//! directory. A reader never observes a partial snapshot.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::QueueMember;
use crate::types::PullRequestDescriptor;

/// Current snapshot schema version.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("unsupported snapshot schema version {found} (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },

    #[error("snapshot task interrupted")]
    Interrupted,
}

/// Serialized state of one queue controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub schema_version: u32,
    pub taken_at: DateTime<Utc>,

    /// Priority queue members, head first.
    pub priority: Vec<QueueMember>,

    /// Primary queue members, head first.
    pub primary: Vec<QueueMember>,

    /// Failure counts for PRs currently queued, keyed by PR number.
    #[serde(default)]
    pub attempts: Vec<(u64, u32)>,

    /// PRs that exhausted their processing attempts.
    #[serde(default)]
    pub dead: Vec<PullRequestDescriptor>,
}

/// File path of the snapshot for a (repo, branch) queue controller.
///
/// The branch name is flattened so nested branch names stay a single path
/// component.
pub fn snapshot_path(dir: &Path, ctrl_id: &str, branch: &str) -> PathBuf {
    let flat = branch.replace('/', "-");
    dir.join(format!("{ctrl_id}--{flat}.json"))
}

/// Writes a snapshot atomically.
pub async fn save(path: &Path, snapshot: &QueueSnapshot) -> Result<(), SnapshotError> {
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
        .await
        .map_err(|_| SnapshotError::Interrupted)?
}

/// Loads a snapshot, returning `None` when no snapshot exists.
pub async fn load(path: &Path) -> Result<Option<QueueSnapshot>, SnapshotError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let snapshot: QueueSnapshot = serde_json::from_slice(&bytes)?;
    if snapshot.schema_version != SCHEMA_VERSION {
        return Err(SnapshotError::SchemaVersion {
            found: snapshot.schema_version,
            expected: SCHEMA_VERSION,
        });
    }

    Ok(Some(snapshot))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SnapshotError> {
    let dir = path.parent().ok_or_else(|| {
        SnapshotError::Io(std::io::Error::other("snapshot path has no parent"))
    })?;
    fs::create_dir_all(dir)?;

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    // Persist the rename itself.
    fs::File::open(dir)?.sync_all()?;

    Ok(())
}
