//! Per-package update driver.
//!
//! Wraps one package's reconciliation with its checkpoint: decide
//! whether anything needs doing at all, hand the request to the
//! reconciler, and persist the outcome. The checkpoint is written only
//! on a definitive outcome; any error leaves the previous one intact.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, bail, ensure};
use tracing::{info, warn};

use wingup_core::{PackageVersion, UpdateRequest};
use wingup_github::{Outcome, Reconciler};

use crate::checkpoint::Checkpoint;
use crate::source::PackageSource;

/// What the driver did for one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageRun {
  /// Nothing to do; the checkpoint already covers the latest version.
  Unchanged,
  /// The reconciler ran to a terminal outcome.
  Reconciled(Outcome),
}

pub fn run_package(
  source: &mut dyn PackageSource,
  checkpoint_dir: &Path,
  reconciler: &mut Reconciler<'_>,
) -> Result<PackageRun> {
  let moniker = source.moniker().to_string();
  let path = checkpoint_dir.join(format!("{moniker}.json"));

  let Some(checkpoint) = Checkpoint::load(&path)? else {
    bail!(
      "no checkpoint for '{moniker}': seed {} with \
       {{\"version\":\"<published version>\",\"hasReleaseNotes\":true}}",
      path.display()
    );
  };

  if let Some(number) = checkpoint.blocking_pr {
    if reconciler.catalog.is_proposal_open(number)? {
      warn!(%moniker, number, "last update is still blocked by an open proposal");
    } else {
      info!(%moniker, number, "blocking proposal has settled");
    }
  }

  let old = PackageVersion::from_str(&checkpoint.version)
    .with_context(|| format!("checkpoint version for '{moniker}' is unparseable"))?;
  let latest = source.latest_version()?;
  ensure!(
    latest >= old,
    "upstream version went backwards for '{moniker}': {old} -> {latest}"
  );

  if latest == old && checkpoint.has_release_notes && checkpoint.blocking_pr.is_none() {
    info!(%moniker, version = %latest, "already up to date");
    return Ok(PackageRun::Unchanged);
  }

  let version = latest.to_string();
  let has_release_notes = source.has_release_notes()?;
  if latest == old && !has_release_notes {
    info!(%moniker, version = %latest, "no release notes appeared, nothing to add");
    return Ok(PackageRun::Unchanged);
  }

  let installers = source.installers()?;
  let mut args = source.update_args()?;
  if args.base_version.is_none() {
    args.base_version = Some(checkpoint.version.clone());
  }

  let request = UpdateRequest {
    identifier: source.identifier().to_string(),
    version: version.clone(),
    installers,
    args,
  };
  let outcome = reconciler.reconcile(&request)?;

  let blocking_pr = match &outcome {
    Outcome::Blocked { proposal } => Some(*proposal),
    _ => None,
  };
  Checkpoint {
    version,
    has_release_notes,
    blocking_pr,
  }
  .save(&path)?;

  Ok(PackageRun::Reconciled(outcome))
}
