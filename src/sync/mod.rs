//! Services that keep projects in step with their GitHub repositories.

pub mod clone;
pub mod issues;
pub mod poller;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use clone::{
    resolve_repository_clone_target, CloneTarget, EnsureLocalCloneInput, EnsureLocalCloneResult,
    RepoCloneManager,
};
pub use issues::{ImportProjectInput, ImportProjectResult, IssueImporter};
pub use poller::{IntervalTicker, PollSummary, RepoDriftPoller, TokioTicker};
pub use store::{
    IssueImportStore, RepoBindingPollStore, RepoBranchHeadClient, RepoCloneStateStore,
    RepoSyncJobEnqueuer,
};
