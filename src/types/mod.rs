//! Core domain types for repository and branch orchestration.
//!
//! - [`ids`]: newtype wrappers for identifiers (PR numbers, SHAs, repo ids)
//! - [`repo`]: the repository aggregate and provider-facing data
//! - [`event`]: inbound signal payloads (push, create/delete, pull request)

pub mod event;
pub mod ids;
pub mod repo;

pub use event::{
    CreateOrDeleteEvent, PullRequestAction, PullRequestEvent, PushEvent, branch_name_from_ref,
};
pub use ids::{PrNumber, RepoUuid, Sha};
pub use repo::{
    Changes, Commit, MessageProvider, ProviderInfo, PullRequestDescriptor, Repo, RepoProvider,
    UserIdentity,
};
