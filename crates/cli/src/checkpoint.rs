//! Per-package checkpoint files.
//!
//! One JSON file per package records what the last successful run
//! concluded, so the next run can skip work that is already done:
//!
//! ```json
//! {
//!   "version": "5.1.0",
//!   "hasReleaseNotes": true,
//!   "blockingPr": 12345
//! }
//! ```
//!
//! Saves go through a temporary file in the same directory followed by
//! a rename, so an interrupted run never truncates a checkpoint.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the last run concluded for one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
  /// Last version this automation submitted (or found published).
  pub version: String,

  /// Whether that version's release notes made it into the catalog.
  pub has_release_notes: bool,

  /// A foreign pull request the last run was waiting on, if any.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub blocking_pr: Option<u64>,
}

/// Errors that can occur when working with checkpoint files.
#[derive(Debug, Error)]
pub enum CheckpointError {
  #[error("failed to read checkpoint file: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write checkpoint file: {0}")]
  Write(#[source] io::Error),

  #[error("failed to parse checkpoint file: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize checkpoint: {0}")]
  Serialize(#[source] serde_json::Error),
}

impl Checkpoint {
  /// Load a checkpoint from the given path.
  ///
  /// Returns `Ok(None)` if the file doesn't exist; a package without a
  /// seeded checkpoint is the caller's error to report.
  pub fn load(path: &Path) -> Result<Option<Self>, CheckpointError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(CheckpointError::Read(e)),
    };
    serde_json::from_str(&content).map(Some).map_err(CheckpointError::Parse)
  }

  /// Save atomically: write to a sibling temporary file, then rename
  /// over the destination.
  pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
    let content = serde_json::to_string(self).map_err(CheckpointError::Serialize)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(CheckpointError::Write)?;
    fs::write(tmp.path(), content).map_err(CheckpointError::Write)?;
    tmp
      .persist(path)
      .map_err(|e| CheckpointError::Write(e.error))?;
    Ok(())
  }
}
