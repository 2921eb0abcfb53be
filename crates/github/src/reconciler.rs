//! Proposal reconciler.
//!
//! Drives one package's update from an [`UpdateRequest`] to a terminal
//! outcome: nothing to do, a commit onto an existing proposal branch,
//! a brand-new proposal, or "blocked behind someone else's proposal".
//! The decision order matters; see the match in [`Reconciler::reconcile`].
//! Catalog-state violations are detected before any write is issued.

use chrono::Local;
use thiserror::Error;
use tracing::{debug, info, warn};

use wingup_core::{
  ArtifactFetcher, BuildError, ChecksumCache, DiffLine, ManifestSet, UpdateArgs, UpdateRequest,
  build_new_version, fill_in_release_notes, try_parse_version, unified_diff,
};

use crate::gateway::{BranchRef, Catalog, GatewayError, Proposal, ProposalState, manifest_path};

/// Errors terminating one package's reconciliation.
#[derive(Debug, Error)]
pub enum ReconcileError {
  #[error(transparent)]
  Gateway(#[from] GatewayError),

  #[error(transparent)]
  Build(#[from] BuildError),

  /// More than one open proposal in the same ownership bucket means
  /// someone has to clean up the catalog by hand.
  #[error("two open proposals in the {bucket} bucket: #{first} and #{second}")]
  DuplicateOpenProposal {
    bucket: &'static str,
    first: u64,
    second: u64,
  },

  #[error("open proposal #{0} has no head branch")]
  MissingHeadBranch(u64),

  #[error("no parseable version directories under '{0}'")]
  NoBaseVersion(String),

  #[error("base version directory '{0}' holds no manifests")]
  EmptyBaseDirectory(String),
}

/// Terminal outcome of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  /// The catalog already reflects the request.
  UpToDate,
  /// A commit was pushed onto the existing owned proposal branch.
  UpdatedExisting { commit_url: String },
  /// A fresh branch and proposal were created.
  Opened { proposal_url: String },
  /// The catalog already reflects the request on a foreign proposal's
  /// branch; nothing can be done until that proposal settles.
  Blocked { proposal: u64 },
}

/// Sink for pre-commit audit diffs, one call per changed document.
pub trait AuditSink {
  fn diff(&mut self, filename: &str, lines: &[DiffLine]);
}

/// Discards diffs; useful in tests.
pub struct NullAudit;

impl AuditSink for NullAudit {
  fn diff(&mut self, _filename: &str, _lines: &[DiffLine]) {}
}

pub struct Reconciler<'a> {
  pub catalog: &'a dyn Catalog,
  pub fetcher: &'a dyn ArtifactFetcher,
  pub cache: &'a mut ChecksumCache,
  /// Authors whose open proposals are ignored rather than treated as
  /// blocking. Typically vendor bots that file cosmetic updates.
  pub benign_authors: &'a [String],
  pub audit: &'a mut dyn AuditSink,
}

struct Buckets<'p> {
  owned_open: Option<&'p Proposal>,
  foreign_open: Option<&'p Proposal>,
}

impl<'a> Reconciler<'a> {
  pub fn reconcile(&mut self, request: &UpdateRequest) -> Result<Outcome, ReconcileError> {
    let UpdateRequest {
      identifier,
      version,
      installers,
      args,
    } = request;
    info!(
      %identifier,
      %version,
      with_notes = request.has_release_notes(),
      "reconciling"
    );

    let proposals = self.catalog.search_proposals(identifier, version)?;
    debug!(count = proposals.len(), "existing proposals");
    let buckets = self.classify(&proposals)?;

    let (sha, owned_ref) = self.resolve_branch(&buckets)?;

    let path = manifest_path(identifier, Some(version));
    let at_target = self.catalog.read_manifests(&sha, &path)?;

    let rolled_back = buckets.owned_open.is_some()
      && args.base_version.as_deref().is_some_and(|base| base != version);

    let (old, new) = if at_target.is_empty() {
      info!("no manifests at the target version, building fresh");
      let base = self.base_manifests(identifier, args, &sha)?;
      let built = build_new_version(&base, identifier, version, installers, args, self.fetcher, self.cache)?;
      (base, Built::Fresh(built))
    } else if rolled_back {
      info!("owned proposal tracks a different base version, rebuilding");
      let base = self.base_manifests(identifier, args, &sha)?;
      let built = build_new_version(&base, identifier, version, installers, args, self.fetcher, self.cache)?;
      (base, Built::Rerun(built))
    } else {
      let mut patched = at_target.clone();
      let changed = request.has_release_notes()
        && fill_in_release_notes(&mut patched, identifier, args, false)?;
      if !changed {
        info!("catalog is already up to date");
        if let (Some(foreign), None) = (buckets.foreign_open, buckets.owned_open) {
          return Ok(Outcome::Blocked {
            proposal: foreign.number,
          });
        }
        return Ok(Outcome::UpToDate);
      }
      (at_target, Built::NotesDelta(patched))
    };

    let message = format!("{}: {identifier} version {version}", new.message_prefix());
    let manifests = new.into_set();
    self.render_audit(&old, &manifests);

    if let Some(owned_ref) = owned_ref {
      let commit_url = self
        .catalog
        .create_commit(&owned_ref.name, &message, &path, &manifests, &sha)?;
      info!(url = %commit_url, "updated existing proposal");
      return Ok(Outcome::UpdatedExisting { commit_url });
    }

    self.catalog.create_fork()?;
    let branch = format!("{identifier}-{version}--{}", Local::now().format("%Y%m%d-%H%M%S"));
    info!(%branch, "creating branch");
    self.catalog.create_branch(&branch, &sha)?;
    let commit_url = self.catalog.create_commit(&branch, &message, &path, &manifests, &sha)?;
    debug!(url = %commit_url, "created commit");
    let proposal_url = self.catalog.create_proposal(&message, &branch)?;
    info!(url = %proposal_url, "created proposal");
    Ok(Outcome::Opened { proposal_url })
  }

  /// Sort existing proposals into ownership buckets, enforcing the
  /// at-most-one-open-per-bucket invariant.
  fn classify<'p>(&self, proposals: &'p [Proposal]) -> Result<Buckets<'p>, ReconcileError> {
    let mut buckets = Buckets {
      owned_open: None,
      foreign_open: None,
    };

    for proposal in proposals {
      debug!(
        number = proposal.number,
        title = %proposal.title,
        author = %proposal.author,
        state = ?proposal.state,
        "existing proposal"
      );
      if proposal.head_repository_owner == self.catalog.fork_owner() {
        if proposal.state == ProposalState::Open {
          if let Some(first) = buckets.owned_open {
            return Err(ReconcileError::DuplicateOpenProposal {
              bucket: "owned",
              first: first.number,
              second: proposal.number,
            });
          }
          buckets.owned_open = Some(proposal);
        } else if proposal.head_ref.is_some() {
          // A settled proposal whose branch still exists; the
          // maintenance sweep will pick it up.
          warn!(number = proposal.number, "settled owned proposal still has a live branch");
        }
      } else if proposal.state == ProposalState::Open {
        if self.benign_authors.contains(&proposal.author) {
          info!(author = %proposal.author, "ignoring proposal from benign author");
          continue;
        }
        if let Some(first) = buckets.foreign_open {
          return Err(ReconcileError::DuplicateOpenProposal {
            bucket: "foreign",
            first: first.number,
            second: proposal.number,
          });
        }
        buckets.foreign_open = Some(proposal);
      }
    }
    Ok(buckets)
  }

  /// Pick the commit to work from: the owned branch head, then a
  /// foreign branch head, then the catalog's default branch.
  fn resolve_branch(&self, buckets: &Buckets<'_>) -> Result<(String, Option<BranchRef>), ReconcileError> {
    if let Some(owned) = buckets.owned_open {
      let head = owned
        .head_ref
        .clone()
        .ok_or(ReconcileError::MissingHeadBranch(owned.number))?;
      info!(branch = %head.name, "working on the owned proposal branch");
      return Ok((head.sha.clone(), Some(head)));
    }
    if let Some(foreign) = buckets.foreign_open {
      let head = foreign
        .head_ref
        .clone()
        .ok_or(ReconcileError::MissingHeadBranch(foreign.number))?;
      info!(author = %foreign.author, "inspecting a foreign proposal branch");
      return Ok((head.sha, None));
    }
    debug!("working from the default branch");
    Ok((self.catalog.default_branch_sha()?, None))
  }

  /// Documents to build the new version from: the explicit base
  /// version when it exists in the catalog, otherwise the highest
  /// published version not above it (or just the highest).
  fn base_manifests(
    &self,
    identifier: &str,
    args: &UpdateArgs,
    sha: &str,
  ) -> Result<ManifestSet, ReconcileError> {
    if let Some(base) = &args.base_version {
      let manifests = self.catalog.read_manifests(sha, &manifest_path(identifier, Some(base)))?;
      if !manifests.is_empty() {
        return Ok(manifests);
      }
    }

    let root = manifest_path(identifier, None);
    let limit = args.base_version.as_deref().and_then(try_parse_version);
    let best = self
      .catalog
      .list_subdirectories(sha, &root)?
      .iter()
      .filter_map(|name| try_parse_version(name))
      .filter(|candidate| limit.as_ref().is_none_or(|limit| candidate <= limit))
      .max()
      .ok_or_else(|| ReconcileError::NoBaseVersion(root))?;

    let path = manifest_path(identifier, Some(&best.to_string()));
    let manifests = self.catalog.read_manifests(sha, &path)?;
    if manifests.is_empty() {
      return Err(ReconcileError::EmptyBaseDirectory(path));
    }
    debug!(base = %best, "resolved base version");
    Ok(manifests)
  }

  fn render_audit(&mut self, old: &ManifestSet, new: &ManifestSet) {
    for (filename, text) in new {
      let previous = old.get(filename).map(String::as_str).unwrap_or("");
      let lines = unified_diff(filename, previous, text);
      if !lines.is_empty() {
        self.audit.diff(filename, &lines);
      }
    }
  }
}

enum Built {
  Fresh(ManifestSet),
  Rerun(ManifestSet),
  NotesDelta(ManifestSet),
}

impl Built {
  fn message_prefix(&self) -> &'static str {
    match self {
      Built::Fresh(_) => "New version",
      Built::Rerun(_) => "New version (rerun)",
      Built::NotesDelta(_) => "ReleaseNotes",
    }
  }

  fn into_set(self) -> ManifestSet {
    match self {
      Built::Fresh(set) | Built::Rerun(set) | Built::NotesDelta(set) => set,
    }
  }
}
