//! Package version parsing and ordering.
//!
//! Catalog versions are dotted tuples of non-negative integers
//! (`1.2.3`, `4.0.14.25`). A few vendors use an `r` separator for
//! revision suffixes (`2.3r4`); both separators split identically, so
//! `1.2r3` and `1.2.3` compare equal while each keeps its original
//! spelling for display and path construction.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Error produced when a version string fails to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version string '{0}'")]
pub struct VersionParseError(pub String);

/// An ordered package version.
///
/// Comparison and equality use the numeric tuple only; the original
/// string is kept verbatim for display. Construction either succeeds
/// completely or fails, there is no partially parsed value.
#[derive(Debug, Clone)]
pub struct PackageVersion {
  raw: String,
  parts: Vec<u64>,
}

impl PackageVersion {
  /// Build a version from an explicit tuple of components.
  ///
  /// The display form is the dot-joined tuple.
  pub fn from_parts(parts: Vec<u64>) -> Self {
    let raw = parts.iter().map(u64::to_string).collect::<Vec<_>>().join(".");
    Self { raw, parts }
  }

  /// The numeric components of this version.
  pub fn parts(&self) -> &[u64] {
    &self.parts
  }

  /// The original version string.
  pub fn as_str(&self) -> &str {
    &self.raw
  }
}

impl FromStr for PackageVersion {
  type Err = VersionParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s.is_empty() {
      return Err(VersionParseError(s.to_string()));
    }
    let parts = s
      .split(['.', 'r'])
      .map(|part| part.parse::<u64>())
      .collect::<Result<Vec<_>, _>>()
      .map_err(|_| VersionParseError(s.to_string()))?;
    Ok(Self {
      raw: s.to_string(),
      parts,
    })
  }
}

impl fmt::Display for PackageVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.raw)
  }
}

impl PartialEq for PackageVersion {
  fn eq(&self, other: &Self) -> bool {
    self.parts == other.parts
  }
}

impl Eq for PackageVersion {}

impl PartialOrd for PackageVersion {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for PackageVersion {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    self.parts.cmp(&other.parts)
  }
}

impl std::hash::Hash for PackageVersion {
  fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
    self.parts.hash(state);
  }
}

/// Parse a version string, returning `None` on failure.
///
/// Used when scanning catalog directory names, where non-version
/// entries (".validation", etc.) are expected and skipped.
pub fn try_parse_version(s: &str) -> Option<PackageVersion> {
  s.parse().ok()
}
