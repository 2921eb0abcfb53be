//! Package discovery capability.
//!
//! Each package the batch updates is represented by one value
//! implementing [`PackageSource`]. The driver only ever talks to this
//! trait; where the data comes from (a releases API, a download page,
//! a vendor feed) is the implementation's business.

use anyhow::Result;
use wingup_core::{Installer, PackageVersion, UpdateArgs};

pub trait PackageSource {
  /// Short name used for the checkpoint filename.
  fn moniker(&self) -> &str;

  /// Catalog package identifier (`Publisher.Package`).
  fn identifier(&self) -> &str;

  /// Discover the newest published version. Called first; the other
  /// hooks may rely on the state it establishes.
  fn latest_version(&mut self) -> Result<PackageVersion>;

  /// Whether the discovered version ships usable release notes.
  fn has_release_notes(&mut self) -> Result<bool>;

  /// Installer list for the discovered version, download URLs resolved.
  fn installers(&mut self) -> Result<Vec<Installer>>;

  /// Everything else the builder needs: notes, dates, carve-outs.
  fn update_args(&mut self) -> Result<UpdateArgs>;
}
