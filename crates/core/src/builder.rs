//! Manifest set construction for a target version.
//!
//! Given the documents of a base version (or the target version
//! itself), the builder produces the complete document set for the
//! target: versions bumped, installer URLs and checksums rewritten
//! positionally, stale release notes cleared, and requested notes
//! normalized and patched in. The input set is never mutated; every
//! build returns a fresh set.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{debug, info};

use crate::document::{self, DocumentError};
use crate::fetch::{ArtifactFetcher, ChecksumCache, FetchError};
use crate::installer::{Installer, InstallerDocumentView, InstallerMismatch};
use crate::notes;
use crate::request::UpdateArgs;

/// Filename to document text, for exactly one package version.
pub type ManifestSet = BTreeMap<String, String>;

/// Errors raised while building a manifest set.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Document(#[from] DocumentError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  /// Positional pairing requires equal cardinality.
  #[error("catalog lists {existing} installers but {desired} were supplied")]
  InstallerCount { existing: usize, desired: usize },

  #[error(transparent)]
  InstallerMismatch(#[from] InstallerMismatch),

  /// The installer document would not parse as YAML at all.
  #[error("failed to parse installer list: {0}")]
  InstallerParse(#[source] serde_yaml::Error),

  /// A locale's notes were requested but its manifest is missing.
  #[error("no locale manifest '{0}' in this version's document set")]
  MissingLocaleManifest(String),

  /// A load-bearing notes URL was requested but not supplied.
  #[error("release notes for locale '{0}' require a notes URL")]
  MissingNotesUrl(String),
}

/// Name of the installer document within a version's directory.
pub fn installer_manifest_name(identifier: &str) -> String {
  format!("{identifier}.installer.yaml")
}

/// Name of a locale document within a version's directory.
pub fn locale_manifest_name(identifier: &str, locale: &str) -> String {
  format!("{identifier}.locale.{locale}.yaml")
}

/// Extract the locale tag out of a locale manifest filename.
fn locale_of(filename: &str) -> Option<&str> {
  filename.strip_suffix(".yaml")?.split_once(".locale.").map(|(_, l)| l)
}

/// Build the full document set for `version` from base documents.
///
/// `manifests` holds either the target version's own documents (when
/// re-running against an existing proposal) or a clone of the nearest
/// base version's. The returned set is complete and internally
/// consistent; the input is left untouched.
pub fn build_new_version(
  manifests: &ManifestSet,
  identifier: &str,
  version: &str,
  installers: &[Installer],
  args: &UpdateArgs,
  fetcher: &dyn ArtifactFetcher,
  cache: &mut ChecksumCache,
) -> Result<ManifestSet, BuildError> {
  let mut out = ManifestSet::new();

  for (filename, text) in manifests {
    let mut text = document::bump_schema(text)?;
    text = document::replace_field(&text, "PackageVersion", version)?;

    if filename.ends_with(".installer.yaml") {
      text = rebuild_installers(&text, version, installers, args, fetcher, cache)?;
    } else if let Some(locale) = locale_of(filename) {
      text = clear_stale_notes(&text, locale, version, args)?;
    }

    out.insert(filename.clone(), text);
  }

  if !args.release_notes.is_empty() {
    fill_in_release_notes(&mut out, identifier, args, true)?;
  }

  Ok(out)
}

/// Rewrite the installer document for the new version.
fn rebuild_installers(
  text: &str,
  version: &str,
  installers: &[Installer],
  args: &UpdateArgs,
  fetcher: &dyn ArtifactFetcher,
  cache: &mut ChecksumCache,
) -> Result<String, BuildError> {
  let mut text = text.to_string();

  // Pairing is validated before any download starts.
  if !args.override_old_installers {
    let view = InstallerDocumentView::parse(&text).map_err(BuildError::InstallerParse)?;
    if view.installers.len() != installers.len() {
      return Err(BuildError::InstallerCount {
        existing: view.installers.len(),
        desired: installers.len(),
      });
    }
    for (index, (existing, desired)) in view.installers.iter().zip(installers).enumerate() {
      desired.check_compatible(existing, index)?;
    }
  }

  // Hash each distinct URL once; several entries may share an artifact.
  let mut digests: BTreeMap<&str, crate::fetch::ArtifactDigest> = BTreeMap::new();
  let mut inferred_date: Option<NaiveDate> = None;
  for installer in installers {
    let url = installer.installer_url.as_str();
    if digests.contains_key(url) {
      continue;
    }
    let digest = cache.fetch_cached(fetcher, url)?;
    if let Some(date) = digest.last_modified {
      inferred_date = Some(inferred_date.map_or(date, |d| d.min(date)));
    }
    digests.insert(url, digest);
  }

  if args.override_old_installers {
    // Prior entries and their checksums are discarded wholesale.
    let complete: Vec<Installer> = installers
      .iter()
      .map(|installer| {
        let mut installer = installer.clone();
        installer.installer_sha256 = digests.get(installer.installer_url.as_str()).map(|d| d.sha256.clone());
        installer
      })
      .collect();
    text = document::replace_installers_block(&text, &complete)?;
  } else {
    let pairs: Vec<(String, String)> = installers
      .iter()
      .map(|installer| {
        let sha = digests
          .get(installer.installer_url.as_str())
          .map(|d| d.sha256.clone())
          .unwrap_or_default();
        (installer.installer_url.clone(), sha)
      })
      .collect();
    text = document::rewrite_installer_urls(&text, &pairs)?;
  }

  // The release date is the earliest fresh download timestamp unless
  // the request pins one explicitly. With neither (every checksum was
  // a cache hit) the date cloned from the base version describes the
  // wrong release and is dropped.
  match args.release_date.or(inferred_date) {
    Some(date) => {
      let date = date.format("%Y-%m-%d").to_string();
      debug!(version, date = %date, "writing release date");
      if let Some(updated) = document::insert_or_update(&text, "ReleaseDate", &date, true)? {
        text = updated;
      }
    }
    None => {
      if let Some(updated) = document::remove_field(&text, "ReleaseDate")? {
        debug!(version, "dropping release date inherited from the base version");
        text = updated;
      }
    }
  }

  Ok(text)
}

/// Drop release notes that describe a prior version.
///
/// Notes survive only when the new version matches the configured
/// version prefix or the locale is about to receive fresh notes.
/// Placeholder comments always survive; only populated values are
/// cleared.
fn clear_stale_notes(text: &str, locale: &str, version: &str, args: &UpdateArgs) -> Result<String, BuildError> {
  if let Some(prefix) = &args.keep_notes_on_version_prefix {
    if version.starts_with(prefix.as_str()) {
      return Ok(text.to_string());
    }
  }
  if args.release_notes.contains_key(locale) {
    return Ok(text.to_string());
  }

  let mut text = text.to_string();
  for key in ["ReleaseNotes", "ReleaseNotesUrl"] {
    if let Some(updated) = document::remove_field(&text, key)? {
      debug!(locale, key, "clearing stale release notes field");
      text = updated;
    }
  }
  Ok(text)
}

/// Patch requested release notes into the locale documents.
///
/// Returns whether any document changed. Without `force` this doubles
/// as the "already applied" probe: notes that are already present
/// leave the set untouched and report `false`.
pub fn fill_in_release_notes(
  manifests: &mut ManifestSet,
  identifier: &str,
  args: &UpdateArgs,
  force: bool,
) -> Result<bool, BuildError> {
  let mut changed = false;
  for (locale, notes) in &args.release_notes {
    if fill_in_locale(manifests, identifier, args, locale, notes, force)? {
      changed = true;
    }
  }
  Ok(changed)
}

fn fill_in_locale(
  manifests: &mut ManifestSet,
  identifier: &str,
  args: &UpdateArgs,
  locale: &str,
  notes: &crate::request::ReleaseNotes,
  force: bool,
) -> Result<bool, BuildError> {
  let text = notes::normalize(&notes.text, locale, args.owner_and_repo.as_deref());
  let filename = locale_manifest_name(identifier, locale);
  let manifest = manifests
    .get(&filename)
    .ok_or_else(|| BuildError::MissingLocaleManifest(filename.clone()))?
    .clone();

  let updated = if args.is_url_important || force {
    if notes.url.is_empty() {
      return Err(BuildError::MissingNotesUrl(locale.to_string()));
    }
    let Some(with_url) = document::insert_or_update(&manifest, "ReleaseNotesUrl", &notes.url, force)? else {
      return Ok(false);
    };
    document::insert_or_update(&with_url, "ReleaseNotes", &text, true)?.unwrap_or(with_url)
  } else {
    let Some(with_notes) = document::insert_or_update(&manifest, "ReleaseNotes", &text, force)? else {
      return Ok(false);
    };
    if notes.url.is_empty() {
      with_notes
    } else {
      document::insert_or_update(&with_notes, "ReleaseNotesUrl", &notes.url, force)?.unwrap_or(with_notes)
    }
  };
  info!(locale, "release notes applied");
  manifests.insert(filename, updated);

  if let Some(date) = args.release_date {
    let installer_name = installer_manifest_name(identifier);
    if let Some(manifest) = manifests.get(&installer_name) {
      let date = date.format("%Y-%m-%d").to_string();
      if let Some(updated) = document::insert_or_update(manifest, "ReleaseDate", &date, false)? {
        manifests.insert(installer_name, updated);
      }
    }
  }

  Ok(true)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::ArtifactDigest;
  use crate::request::ReleaseNotes;

  const INSTALLER_DOC: &str = "\
# yaml-language-server: $schema=https://aka.ms/winget-manifest.installer.1.6.0.schema.json

PackageIdentifier: Example.App
PackageVersion: 1.2.3
Installers:
- Architecture: x64
  InstallerUrl: https://example.com/app-1.2.3-x64.exe
  InstallerSha256: OLD64
- Architecture: x86
  InstallerUrl: https://example.com/app-1.2.3-x86.exe
  InstallerSha256: OLD86
ManifestType: installer
ManifestVersion: 1.6.0
";

  const LOCALE_DOC: &str = "\
# yaml-language-server: $schema=https://aka.ms/winget-manifest.defaultLocale.1.6.0.schema.json

PackageIdentifier: Example.App
PackageVersion: 1.2.3
PackageLocale: en-US
Publisher: Example
ShortDescription: An example application.
# ReleaseNotes:
# ReleaseNotesUrl:
ManifestType: defaultLocale
ManifestVersion: 1.6.0
";

  const LOCALE_DOC_FR: &str = "\
# yaml-language-server: $schema=https://aka.ms/winget-manifest.locale.1.6.0.schema.json

PackageIdentifier: Example.App
PackageVersion: 1.2.3
PackageLocale: fr-FR
ShortDescription: Une application.
ReleaseNotes: anciennes notes
ReleaseNotesUrl: https://example.com/old
ManifestType: locale
ManifestVersion: 1.6.0
";

  /// Serves canned digests keyed by URL suffix.
  struct FakeFetcher;

  impl ArtifactFetcher for FakeFetcher {
    fn fetch(&self, url: &str) -> Result<ArtifactDigest, FetchError> {
      let (sha, day) = if url.contains("x64") { ("SHA64", 9) } else { ("SHA86", 7) };
      Ok(ArtifactDigest {
        sha256: sha.to_string(),
        last_modified: NaiveDate::from_ymd_opt(2024, 5, day),
      })
    }
  }

  fn base_set() -> ManifestSet {
    ManifestSet::from([
      ("Example.App.installer.yaml".to_string(), INSTALLER_DOC.to_string()),
      ("Example.App.locale.en-US.yaml".to_string(), LOCALE_DOC.to_string()),
      ("Example.App.locale.fr-FR.yaml".to_string(), LOCALE_DOC_FR.to_string()),
    ])
  }

  fn desired_installers() -> Vec<Installer> {
    vec![
      Installer {
        architecture: Some("x64".to_string()),
        installer_url: "https://example.com/app-2.0.0-x64.exe".to_string(),
        ..Installer::default()
      },
      Installer {
        architecture: Some("x86".to_string()),
        installer_url: "https://example.com/app-2.0.0-x86.exe".to_string(),
        ..Installer::default()
      },
    ]
  }

  fn build(args: UpdateArgs) -> Result<ManifestSet, BuildError> {
    let mut cache = ChecksumCache::new();
    build_new_version(
      &base_set(),
      "Example.App",
      "2.0.0",
      &desired_installers(),
      &args,
      &FakeFetcher,
      &mut cache,
    )
  }

  #[test]
  fn bumps_version_everywhere() {
    let set = build(UpdateArgs::default()).unwrap();
    for text in set.values() {
      assert!(text.contains("PackageVersion: 2.0.0"), "{text}");
      assert!(text.contains("ManifestVersion: 1.9.0"));
      assert!(text.contains("1.9.0.schema.json"));
    }
  }

  #[test]
  fn rewrites_urls_and_checksums_positionally() {
    let set = build(UpdateArgs::default()).unwrap();
    let installer = &set["Example.App.installer.yaml"];
    assert!(installer.contains("InstallerUrl: https://example.com/app-2.0.0-x64.exe"));
    assert!(installer.contains("InstallerSha256: SHA64"));
    assert!(installer.contains("InstallerSha256: SHA86"));
    assert!(!installer.contains("OLD64"));
  }

  #[test]
  fn release_date_is_earliest_download_timestamp() {
    let set = build(UpdateArgs::default()).unwrap();
    assert!(set["Example.App.installer.yaml"].contains("ReleaseDate: 2024-05-07"));
  }

  #[test]
  fn explicit_release_date_wins() {
    let args = UpdateArgs {
      release_date: NaiveDate::from_ymd_opt(2024, 6, 1),
      ..UpdateArgs::default()
    };
    let set = build(args).unwrap();
    assert!(set["Example.App.installer.yaml"].contains("ReleaseDate: 2024-06-01"));
  }

  /// Refuses network activity; every checksum must be a cache hit.
  struct CacheOnly;

  impl ArtifactFetcher for CacheOnly {
    fn fetch(&self, url: &str) -> Result<ArtifactDigest, FetchError> {
      panic!("unexpected download of {url}");
    }
  }

  #[test]
  fn cache_only_build_drops_inherited_release_date() {
    let mut base = base_set();
    let doc = base["Example.App.installer.yaml"].replace(
      "ManifestType: installer",
      "ReleaseDate: 2020-01-01\nManifestType: installer",
    );
    base.insert("Example.App.installer.yaml".to_string(), doc);

    let mut cache = ChecksumCache::new();
    for installer in desired_installers() {
      cache.insert(
        installer.installer_url,
        ArtifactDigest {
          sha256: "CACHED".to_string(),
          last_modified: None,
        },
      );
    }

    let set = build_new_version(
      &base,
      "Example.App",
      "2.0.0",
      &desired_installers(),
      &UpdateArgs::default(),
      &CacheOnly,
      &mut cache,
    )
    .unwrap();
    let installer = &set["Example.App.installer.yaml"];
    assert!(installer.contains("PackageVersion: 2.0.0"));
    assert!(installer.contains("InstallerSha256: CACHED"));
    assert!(!installer.contains("ReleaseDate"), "{installer}");
  }

  #[test]
  fn installer_count_mismatch_is_fatal() {
    let mut cache = ChecksumCache::new();
    let err = build_new_version(
      &base_set(),
      "Example.App",
      "2.0.0",
      &desired_installers()[..1],
      &UpdateArgs::default(),
      &FakeFetcher,
      &mut cache,
    )
    .unwrap_err();
    assert!(matches!(err, BuildError::InstallerCount { existing: 2, desired: 1 }));
  }

  #[test]
  fn incompatible_installer_is_fatal() {
    let mut installers = desired_installers();
    installers[0].architecture = Some("arm64".to_string());
    let mut cache = ChecksumCache::new();
    let err = build_new_version(
      &base_set(),
      "Example.App",
      "2.0.0",
      &installers,
      &UpdateArgs::default(),
      &FakeFetcher,
      &mut cache,
    )
    .unwrap_err();
    assert!(matches!(err, BuildError::InstallerMismatch(_)));
  }

  #[test]
  fn override_discards_old_entries() {
    let args = UpdateArgs {
      override_old_installers: true,
      ..UpdateArgs::default()
    };
    let mut cache = ChecksumCache::new();
    let installers = vec![Installer {
      architecture: Some("arm64".to_string()),
      installer_url: "https://example.com/app-2.0.0-x64.exe".to_string(),
      ..Installer::default()
    }];
    let set = build_new_version(
      &base_set(),
      "Example.App",
      "2.0.0",
      &installers,
      &args,
      &FakeFetcher,
      &mut cache,
    )
    .unwrap();
    let installer = &set["Example.App.installer.yaml"];
    assert!(installer.contains("- Architecture: arm64"));
    assert!(installer.contains("InstallerSha256: SHA64"));
    assert!(!installer.contains("x86"));
  }

  #[test]
  fn stale_notes_cleared_for_unrequested_locales() {
    let set = build(UpdateArgs::default()).unwrap();
    let fr = &set["Example.App.locale.fr-FR.yaml"];
    assert!(!fr.contains("ReleaseNotes"));
    // Placeholders in other locales survive untouched.
    let en = &set["Example.App.locale.en-US.yaml"];
    assert!(en.contains("# ReleaseNotes:"));
    assert!(en.contains("# ReleaseNotesUrl:"));
  }

  #[test]
  fn version_prefix_carve_out_keeps_notes() {
    let args = UpdateArgs {
      keep_notes_on_version_prefix: Some("2.0".to_string()),
      ..UpdateArgs::default()
    };
    let set = build(args).unwrap();
    assert!(set["Example.App.locale.fr-FR.yaml"].contains("ReleaseNotes: anciennes notes"));
  }

  #[test]
  fn requested_notes_are_applied_with_force() {
    let args = UpdateArgs {
      release_notes: BTreeMap::from([(
        "en-US".to_string(),
        ReleaseNotes {
          text: "## Changes\n- Fixed **crash**".to_string(),
          url: "https://example.com/releases/2.0.0".to_string(),
        },
      )]),
      ..UpdateArgs::default()
    };
    let set = build(args).unwrap();
    let en = &set["Example.App.locale.en-US.yaml"];
    assert!(en.contains("ReleaseNotes: |-\n  Changes\n  - Fixed crash"));
    assert!(en.contains("ReleaseNotesUrl: https://example.com/releases/2.0.0"));
    assert!(!en.contains("# ReleaseNotes:"));
  }

  #[test]
  fn input_set_is_not_mutated() {
    let input = base_set();
    let before = input.clone();
    let mut cache = ChecksumCache::new();
    let _ = build_new_version(
      &input,
      "Example.App",
      "2.0.0",
      &desired_installers(),
      &UpdateArgs::default(),
      &FakeFetcher,
      &mut cache,
    )
    .unwrap();
    assert_eq!(input, before);
  }

  mod fill_in {
    use super::*;

    fn args_with_notes(url: &str) -> UpdateArgs {
      UpdateArgs {
        release_notes: BTreeMap::from([(
          "en-US".to_string(),
          ReleaseNotes {
            text: "Fresh notes".to_string(),
            url: url.to_string(),
          },
        )]),
        ..UpdateArgs::default()
      }
    }

    #[test]
    fn applies_once_then_reports_no_change() {
      let mut set = base_set();
      let args = args_with_notes("https://example.com/notes");
      assert!(fill_in_release_notes(&mut set, "Example.App", &args, false).unwrap());
      // Second pass without force: already satisfied.
      assert!(!fill_in_release_notes(&mut set, "Example.App", &args, false).unwrap());
    }

    #[test]
    fn url_gating_requires_url() {
      let mut set = base_set();
      let mut args = args_with_notes("");
      args.is_url_important = true;
      let err = fill_in_release_notes(&mut set, "Example.App", &args, false).unwrap_err();
      assert!(matches!(err, BuildError::MissingNotesUrl(_)));
    }

    #[test]
    fn missing_locale_manifest_is_fatal() {
      let mut set = ManifestSet::from([(
        "Example.App.installer.yaml".to_string(),
        INSTALLER_DOC.to_string(),
      )]);
      let args = args_with_notes("https://example.com/notes");
      let err = fill_in_release_notes(&mut set, "Example.App", &args, false).unwrap_err();
      assert!(matches!(err, BuildError::MissingLocaleManifest(_)));
    }

    #[test]
    fn empty_notes_leave_populated_locale_alone() {
      let mut set = base_set();
      let args = UpdateArgs {
        release_notes: BTreeMap::from([(
          "fr-FR".to_string(),
          ReleaseNotes {
            text: "   ".to_string(),
            url: String::new(),
          },
        )]),
        ..UpdateArgs::default()
      };
      assert!(!fill_in_release_notes(&mut set, "Example.App", &args, false).unwrap());
      assert!(set["Example.App.locale.fr-FR.yaml"].contains("anciennes notes"));
    }
  }
}
