//! Installer records and positional compatibility checks.
//!
//! An installer describes one downloadable artifact inside a version's
//! installer manifest. Within a manifest the installer list has
//! positional identity: a desired list is matched index-for-index
//! against the catalog's existing list, never by key.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One installer entry, sparse: absent fields are simply not declared.
///
/// Field names mirror the manifest schema so the read-only
/// `serde_yaml` view of an existing installer document deserializes
/// directly into this type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Installer {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub installer_locale: Option<String>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub architecture: Option<String>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub installer_type: Option<String>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub scope: Option<String>,

  pub installer_url: String,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub installer_sha256: Option<String>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub upgrade_behavior: Option<String>,
}

/// A desired installer's declared fields disagree with the catalog's
/// existing entry at the same position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("installer #{index}: declared {field} '{desired}' does not match existing '{existing}'")]
pub struct InstallerMismatch {
  pub index: usize,
  pub field: &'static str,
  pub desired: String,
  pub existing: String,
}

impl Installer {
  /// Build an installer carrying only a URL.
  pub fn from_url(url: impl Into<String>) -> Self {
    Self {
      installer_url: url.into(),
      ..Self::default()
    }
  }

  /// Check that every non-URL, non-checksum field this installer
  /// declares matches the existing entry at the same position.
  ///
  /// Fields the desired installer leaves undeclared are not compared;
  /// the existing entry may carry any number of extra fields.
  pub fn check_compatible(&self, existing: &Installer, index: usize) -> Result<(), InstallerMismatch> {
    let pairs: [(&'static str, &Option<String>, &Option<String>); 5] = [
      ("InstallerLocale", &self.installer_locale, &existing.installer_locale),
      ("Architecture", &self.architecture, &existing.architecture),
      ("InstallerType", &self.installer_type, &existing.installer_type),
      ("Scope", &self.scope, &existing.scope),
      ("UpgradeBehavior", &self.upgrade_behavior, &existing.upgrade_behavior),
    ];

    for (field, desired, existing_value) in pairs {
      if let Some(desired) = desired {
        if existing_value.as_deref() != Some(desired.as_str()) {
          return Err(InstallerMismatch {
            index,
            field,
            desired: desired.clone(),
            existing: existing_value.clone().unwrap_or_else(|| "(absent)".to_string()),
          });
        }
      }
    }
    Ok(())
  }

  /// Render this installer as manifest YAML lines, in schema field
  /// order, for regenerating an `Installers:` block from scratch.
  pub(crate) fn render_yaml_entry(&self) -> Vec<String> {
    let mut lines = Vec::new();
    let mut push = |key: &str, value: Option<&str>| {
      if let Some(value) = value {
        let prefix = if lines.is_empty() { "- " } else { "  " };
        lines.push(format!("{prefix}{key}: {value}"));
      }
    };
    push("InstallerLocale", self.installer_locale.as_deref());
    push("Architecture", self.architecture.as_deref());
    push("InstallerType", self.installer_type.as_deref());
    push("Scope", self.scope.as_deref());
    push("InstallerUrl", Some(&self.installer_url));
    push("InstallerSha256", self.installer_sha256.as_deref());
    push("UpgradeBehavior", self.upgrade_behavior.as_deref());
    lines
  }
}

/// Read-only typed view of an installer document, used to pair and
/// validate installer lists. Mutation never goes through this view.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstallerDocumentView {
  pub installers: Vec<Installer>,
}

impl InstallerDocumentView {
  /// Parse the installer list out of an installer manifest.
  pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(text)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn existing() -> Installer {
    Installer {
      architecture: Some("x64".to_string()),
      installer_type: Some("zip".to_string()),
      installer_url: "https://example.com/old.zip".to_string(),
      installer_sha256: Some("AAAA".to_string()),
      ..Installer::default()
    }
  }

  #[test]
  fn declared_subset_is_compatible() {
    let desired = Installer {
      architecture: Some("x64".to_string()),
      installer_url: "https://example.com/new.zip".to_string(),
      ..Installer::default()
    };
    assert!(desired.check_compatible(&existing(), 0).is_ok());
  }

  #[test]
  fn url_only_is_compatible() {
    let desired = Installer::from_url("https://example.com/new.zip");
    assert!(desired.check_compatible(&existing(), 0).is_ok());
  }

  #[test]
  fn mismatched_field_is_rejected() {
    let desired = Installer {
      architecture: Some("arm64".to_string()),
      installer_url: "https://example.com/new.zip".to_string(),
      ..Installer::default()
    };
    let err = desired.check_compatible(&existing(), 2).unwrap_err();
    assert_eq!(err.index, 2);
    assert_eq!(err.field, "Architecture");
  }

  #[test]
  fn field_absent_from_existing_is_rejected() {
    let desired = Installer {
      scope: Some("machine".to_string()),
      installer_url: "https://example.com/new.zip".to_string(),
      ..Installer::default()
    };
    assert!(desired.check_compatible(&existing(), 0).is_err());
  }

  #[test]
  fn parse_installer_document() {
    let text = "\
PackageIdentifier: Example.App
PackageVersion: 1.2.3
Installers:
- Architecture: x64
  InstallerType: exe
  InstallerUrl: https://example.com/app-x64.exe
  InstallerSha256: ABCDEF
- Architecture: x86
  InstallerType: exe
  InstallerUrl: https://example.com/app-x86.exe
  InstallerSha256: ABC123
ManifestType: installer
ManifestVersion: 1.9.0
";
    let view = InstallerDocumentView::parse(text).unwrap();
    assert_eq!(view.installers.len(), 2);
    assert_eq!(view.installers[0].architecture.as_deref(), Some("x64"));
    assert_eq!(view.installers[1].installer_sha256.as_deref(), Some("ABC123"));
  }

  #[test]
  fn render_yaml_entry_orders_fields() {
    let installer = Installer {
      architecture: Some("x64".to_string()),
      installer_type: Some("exe".to_string()),
      installer_url: "https://example.com/a.exe".to_string(),
      installer_sha256: Some("FFFF".to_string()),
      ..Installer::default()
    };
    assert_eq!(
      installer.render_yaml_entry(),
      vec![
        "- Architecture: x64",
        "  InstallerType: exe",
        "  InstallerUrl: https://example.com/a.exe",
        "  InstallerSha256: FFFF",
      ]
    );
  }
}
