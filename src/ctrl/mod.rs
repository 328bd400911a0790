//! Long-lived, signal-driven controllers.
//!
//! Every repository gets a small constellation of controller tasks, each
//! addressed by a deterministic key and fed through its own signal inbox:
//!
//! - [`repo`]: per-repo dispatcher; routes inbound provider signals
//! - [`trunk`]: default-branch controller; owns the branch roster and fans
//!   out rebase requests on trunk pushes
//! - [`branch`]: per-branch state machine; push analysis, rebasing,
//!   staleness warnings, PR tracking
//! - [`queue`]: per-(repo, branch) merge-admission controller with a
//!   reorderable two-tier queue
//!
//! Controllers communicate only through the [`hub`], which provides
//! start-if-absent, signal-always dispatch under those deterministic keys.
//! Each instance processes its inbox serially; cross-instance concurrency is
//! real, in-instance concurrency is cooperative.

pub mod base;
pub mod branch;
pub mod hub;
pub mod queue;
pub mod repo;
pub mod signal;
pub mod snapshot;
pub mod trunk;

#[cfg(test)]
mod tests;

pub use hub::Hub;
pub use queue::{NoopProcessor, ProcessError, PrProcessor};
pub use signal::{BranchSignal, QueueSignal, RepoSignal, TrunkSignal};
