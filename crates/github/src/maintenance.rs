//! Fork housekeeping.
//!
//! Runs before the batch loop: a broken (empty) fork is torn down so
//! a later update can re-create it cleanly, and branches whose
//! proposals have all been merged into the official catalog are
//! deleted. A fork left with no surviving branches is not retained,
//! so end-of-run disposal removes it entirely.

use tracing::{debug, info, warn};

use crate::gateway::{Catalog, ForkBranch, ForkStatus, GatewayError, ProposalState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchDisposition {
  Delete,
  Keep,
}

/// A branch may go only when every associated proposal was merged
/// into the official catalog. Anything else still needs the branch:
/// open proposals reference it, closed-unmerged ones deserve a look,
/// and proposals against other repositories are not ours to judge.
pub fn branch_disposition(branch: &ForkBranch, official: &str) -> BranchDisposition {
  if branch.proposals.is_empty() {
    warn!(branch = %branch.name, "no proposals associated with this branch");
    return BranchDisposition::Keep;
  }
  for proposal in &branch.proposals {
    if proposal.repository != official {
      warn!(branch = %branch.name, url = %proposal.url, "proposal is not against the official catalog");
      return BranchDisposition::Keep;
    }
    match proposal.state {
      ProposalState::Merged => {}
      ProposalState::Closed => {
        warn!(branch = %branch.name, url = %proposal.url, "proposal was closed unmerged");
        return BranchDisposition::Keep;
      }
      ProposalState::Open => return BranchDisposition::Keep,
    }
  }
  BranchDisposition::Delete
}

/// Inspect the fork and delete what is no longer needed.
pub fn sweep(catalog: &dyn Catalog, official: &str) -> Result<(), GatewayError> {
  match catalog.fork_status()? {
    ForkStatus::Missing => {
      info!("fork does not exist");
      return Ok(());
    }
    ForkStatus::Empty => {
      warn!("fork is broken, deleting it");
      return catalog.delete_fork();
    }
    ForkStatus::Ready { default_branch } => {
      info!("checking for merged branches");
      let mut pending_deletion = Vec::new();
      for branch in catalog.list_fork_branches()? {
        if branch.name == default_branch {
          if !branch.proposals.is_empty() {
            warn!("the fork's default branch has associated proposals");
            catalog.retain_fork();
          }
          continue;
        }
        match branch_disposition(&branch, official) {
          BranchDisposition::Delete => {
            info!(branch = %branch.name, "branch will be deleted");
            pending_deletion.push(branch.name);
          }
          BranchDisposition::Keep => {
            debug!(branch = %branch.name, "branch will be kept");
            catalog.retain_fork();
          }
        }
      }
      if !pending_deletion.is_empty() {
        info!(count = pending_deletion.len(), "deleting branches");
        catalog.delete_branches(&pending_deletion)?;
      }
      Ok(())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::gateway::AssociatedProposal;

  fn pr(state: ProposalState, repository: &str) -> AssociatedProposal {
    AssociatedProposal {
      title: "New version: Example.App version 2.0.0".to_string(),
      url: "https://pr/1".to_string(),
      state,
      repository: repository.to_string(),
    }
  }

  fn branch(proposals: Vec<AssociatedProposal>) -> ForkBranch {
    ForkBranch {
      name: "Example.App-2.0.0--20240101-000000".to_string(),
      proposals,
    }
  }

  const OFFICIAL: &str = "microsoft/winget-pkgs";

  #[test]
  fn merged_branch_is_deleted() {
    let branch = branch(vec![pr(ProposalState::Merged, OFFICIAL)]);
    assert_eq!(branch_disposition(&branch, OFFICIAL), BranchDisposition::Delete);
  }

  #[test]
  fn open_proposal_keeps_the_branch() {
    let branch = branch(vec![pr(ProposalState::Merged, OFFICIAL), pr(ProposalState::Open, OFFICIAL)]);
    assert_eq!(branch_disposition(&branch, OFFICIAL), BranchDisposition::Keep);
  }

  #[test]
  fn closed_unmerged_proposal_keeps_the_branch() {
    let branch = branch(vec![pr(ProposalState::Closed, OFFICIAL)]);
    assert_eq!(branch_disposition(&branch, OFFICIAL), BranchDisposition::Keep);
  }

  #[test]
  fn foreign_repository_proposal_keeps_the_branch() {
    let branch = branch(vec![pr(ProposalState::Merged, "someone/else")]);
    assert_eq!(branch_disposition(&branch, OFFICIAL), BranchDisposition::Keep);
  }

  #[test]
  fn branch_without_proposals_is_kept() {
    let branch = branch(Vec::new());
    assert_eq!(branch_disposition(&branch, OFFICIAL), BranchDisposition::Keep);
  }

  mod sweeping {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    use wingup_core::ManifestSet;

    use crate::gateway::{DirectoryEntry, Proposal};

    struct SweepCatalog {
      status: ForkStatus,
      branches: Vec<ForkBranch>,
      deleted_branches: RefCell<Vec<String>>,
      fork_deleted: RefCell<bool>,
      retained: RefCell<bool>,
    }

    impl SweepCatalog {
      fn new(status: ForkStatus, branches: Vec<ForkBranch>) -> Self {
        Self {
          status,
          branches,
          deleted_branches: RefCell::new(Vec::new()),
          fork_deleted: RefCell::new(false),
          retained: RefCell::new(false),
        }
      }
    }

    impl Catalog for SweepCatalog {
      fn fork_owner(&self) -> &str {
        "wingup-bot"
      }

      fn search_proposals(&self, _: &str, _: &str) -> Result<Vec<Proposal>, GatewayError> {
        Ok(Vec::new())
      }

      fn default_branch_sha(&self) -> Result<String, GatewayError> {
        Ok(String::new())
      }

      fn read_directory(&self, _: &str, _: &str) -> Result<Vec<DirectoryEntry>, GatewayError> {
        Ok(Vec::new())
      }

      fn read_manifests(&self, _: &str, _: &str) -> Result<ManifestSet, GatewayError> {
        Ok(BTreeMap::new())
      }

      fn create_fork(&self) -> Result<(), GatewayError> {
        Ok(())
      }

      fn create_branch(&self, _: &str, _: &str) -> Result<(), GatewayError> {
        Ok(())
      }

      fn create_commit(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: &ManifestSet,
        _: &str,
      ) -> Result<String, GatewayError> {
        Ok(String::new())
      }

      fn create_proposal(&self, _: &str, _: &str) -> Result<String, GatewayError> {
        Ok(String::new())
      }

      fn is_proposal_open(&self, _: u64) -> Result<bool, GatewayError> {
        Ok(false)
      }

      fn fork_status(&self) -> Result<ForkStatus, GatewayError> {
        Ok(self.status.clone())
      }

      fn list_fork_branches(&self) -> Result<Vec<ForkBranch>, GatewayError> {
        Ok(self.branches.clone())
      }

      fn delete_branches(&self, names: &[String]) -> Result<(), GatewayError> {
        self.deleted_branches.borrow_mut().extend(names.iter().cloned());
        Ok(())
      }

      fn retain_fork(&self) {
        *self.retained.borrow_mut() = true;
      }

      fn delete_fork(&self) -> Result<(), GatewayError> {
        *self.fork_deleted.borrow_mut() = true;
        Ok(())
      }

      fn delete_fork_if_unused(&self) -> Result<bool, GatewayError> {
        if *self.retained.borrow() {
          return Ok(false);
        }
        self.delete_fork()?;
        Ok(true)
      }
    }

    fn named(name: &str, proposals: Vec<AssociatedProposal>) -> ForkBranch {
      ForkBranch {
        name: name.to_string(),
        proposals,
      }
    }

    #[test]
    fn broken_fork_is_torn_down() {
      let catalog = SweepCatalog::new(ForkStatus::Empty, Vec::new());
      sweep(&catalog, OFFICIAL).unwrap();
      assert!(*catalog.fork_deleted.borrow());
    }

    #[test]
    fn missing_fork_is_a_no_op() {
      let catalog = SweepCatalog::new(ForkStatus::Missing, Vec::new());
      sweep(&catalog, OFFICIAL).unwrap();
      assert!(!*catalog.fork_deleted.borrow());
    }

    #[test]
    fn merged_branches_go_and_live_ones_retain_the_fork() {
      let status = ForkStatus::Ready {
        default_branch: "master".to_string(),
      };
      let catalog = SweepCatalog::new(
        status,
        vec![
          named("master", Vec::new()),
          named("A-1.0--x", vec![pr(ProposalState::Merged, OFFICIAL)]),
          named("B-2.0--y", vec![pr(ProposalState::Open, OFFICIAL)]),
        ],
      );
      sweep(&catalog, OFFICIAL).unwrap();
      assert_eq!(*catalog.deleted_branches.borrow(), vec!["A-1.0--x".to_string()]);
      assert!(*catalog.retained.borrow());
      assert!(!catalog.delete_fork_if_unused().unwrap());
    }

    #[test]
    fn fully_merged_fork_is_deleted_at_disposal() {
      let status = ForkStatus::Ready {
        default_branch: "master".to_string(),
      };
      let catalog = SweepCatalog::new(
        status,
        vec![
          named("master", Vec::new()),
          named("A-1.0--x", vec![pr(ProposalState::Merged, OFFICIAL)]),
        ],
      );
      sweep(&catalog, OFFICIAL).unwrap();
      assert_eq!(catalog.deleted_branches.borrow().len(), 1);
      assert!(catalog.delete_fork_if_unused().unwrap());
    }
  }
}
