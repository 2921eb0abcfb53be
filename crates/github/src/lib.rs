//! wingup-github: Remote catalog gateway and proposal reconciler
//!
//! Talks to the GitHub-hosted manifest catalog: searches existing
//! pull requests, reads manifest trees, manages the automation fork,
//! and drives one package's update to a terminal outcome.

mod client;
mod gateway;
mod maintenance;
mod reconciler;

pub use client::{ClientError, GitHubClient};
pub use gateway::{
  AssociatedProposal, BranchRef, Catalog, DirectoryEntry, ForkBranch, ForkStatus, GatewayError,
  GitHubCatalog, Proposal, ProposalState, manifest_path,
};
pub use maintenance::{BranchDisposition, branch_disposition, sweep};
pub use reconciler::{AuditSink, NullAudit, Outcome, ReconcileError, Reconciler};
