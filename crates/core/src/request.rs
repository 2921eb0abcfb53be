//! The caller-supplied desired end state for one package update.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::installer::Installer;

/// Localized release notes plus their source URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseNotes {
  pub text: String,
  pub url: String,
}

/// Optional knobs accompanying an update.
#[derive(Debug, Clone, Default)]
pub struct UpdateArgs {
  /// Version to diff against and clone base manifests from; defaults
  /// to the highest version present in the catalog.
  pub base_version: Option<String>,

  /// Explicit release date; otherwise derived from download timestamps.
  pub release_date: Option<NaiveDate>,

  /// Release notes per locale tag (`en-US`, `zh-CN`, ...).
  pub release_notes: BTreeMap<String, ReleaseNotes>,

  /// Upstream `owner/repo`, enabling issue-reference rewriting in the
  /// notes normalizer.
  pub owner_and_repo: Option<String>,

  /// Keep prior release notes when the new version starts with this
  /// prefix (patch releases sharing a change log).
  pub keep_notes_on_version_prefix: Option<String>,

  /// Treat the notes URL as load-bearing: its presence gates whether
  /// notes are written at all.
  pub is_url_important: bool,

  /// Discard the existing installer list instead of verifying the
  /// desired list against it positionally.
  pub override_old_installers: bool,
}

/// One package's desired end state, constructed fresh per run from
/// upstream discovery data.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
  /// Catalog package identifier (`Publisher.Package`).
  pub identifier: String,
  /// Target version string, verbatim.
  pub version: String,
  /// Desired installer list; when not overriding, its cardinality and
  /// order must match the catalog's existing entry.
  pub installers: Vec<Installer>,
  pub args: UpdateArgs,
}

impl UpdateRequest {
  pub fn new(identifier: impl Into<String>, version: impl Into<String>, installers: Vec<Installer>) -> Self {
    Self {
      identifier: identifier.into(),
      version: version.into(),
      installers,
      args: UpdateArgs::default(),
    }
  }

  /// Whether any locale has release notes attached.
  pub fn has_release_notes(&self) -> bool {
    !self.args.release_notes.is_empty()
  }
}
