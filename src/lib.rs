//! Repo Warden - a branch lifecycle orchestrator and PR merge-admission controller.
//!
//! This library tracks every branch of a source repository through long-lived,
//! signal-driven controller tasks: it detects risky changes, keeps branches
//! rebased against trunk, warns about staleness, and serializes pull-request
//! merges through a reorderable two-tier queue.

pub mod config;
pub mod ctrl;
pub mod git;
pub mod interval;
pub mod io;
pub mod queue;
pub mod types;
