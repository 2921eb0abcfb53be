//! wingup-core: Core logic for wingup
//!
//! This crate turns an update request into a ready-to-commit manifest
//! set: version parsing, surgical YAML patching, installer pairing and
//! hashing, release-notes normalization, and diff rendering.

mod builder;
mod diff;
mod document;
mod fetch;
mod installer;
mod notes;
mod request;
mod version;

pub use builder::{
  BuildError, ManifestSet, build_new_version, fill_in_release_notes, installer_manifest_name,
  locale_manifest_name,
};
pub use diff::{DiffLine, render as render_diff, unified as unified_diff};
pub use document::{DocumentError, SCHEMA_VERSION, bump_schema, field_value, insert_or_update, remove_field};
pub use fetch::{ArtifactDigest, ArtifactFetcher, ChecksumCache, FetchError, HttpFetcher};
pub use installer::{Installer, InstallerDocumentView, InstallerMismatch};
pub use notes::normalize as normalize_release_notes;
pub use request::{ReleaseNotes, UpdateArgs, UpdateRequest};
pub use version::{PackageVersion, VersionParseError, try_parse_version};
