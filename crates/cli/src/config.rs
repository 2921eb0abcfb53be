//! `wingup.toml` configuration.
//!
//! ```toml
//! benign_authors = ["john-preston"]
//! checkpoint_dir = "state"
//!
//! [catalog]
//! owner = "microsoft"
//! repo = "winget-pkgs"
//! default_branch = "master"
//!
//! [[package]]
//! moniker = "telegram"
//! identifier = "Telegram.TelegramDesktop"
//! owner_and_repo = "telegramdesktop/tdesktop"
//! locale = "en-US"
//! pre_release = true
//!
//! [[package.installer]]
//! asset = "tsetup.{version}.exe"
//! architecture = "x86"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
  pub catalog: CatalogConfig,

  /// Authors whose foreign proposals are ignored outright.
  #[serde(default)]
  pub benign_authors: Vec<String>,

  /// Directory holding the per-package checkpoint files.
  #[serde(default = "default_checkpoint_dir")]
  pub checkpoint_dir: PathBuf,

  #[serde(default, rename = "package")]
  pub packages: Vec<PackageConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
  pub owner: String,
  pub repo: String,

  #[serde(default = "default_branch")]
  pub default_branch: String,

  /// Login owning the fork; defaults to `GITHUB_REPOSITORY_OWNER`.
  #[serde(default)]
  pub fork_owner: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageConfig {
  pub moniker: String,
  pub identifier: String,

  /// Upstream `owner/repo` whose releases are watched.
  pub owner_and_repo: String,

  #[serde(default = "default_locale")]
  pub locale: String,

  /// Take the newest release instead of the one marked latest.
  #[serde(default)]
  pub pre_release: bool,

  #[serde(default)]
  pub keep_notes_on_version_prefix: Option<String>,

  #[serde(rename = "installer")]
  pub installers: Vec<InstallerTemplate>,
}

/// One desired installer, identified by its release asset name.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallerTemplate {
  /// Asset filename with `{version}` substituted at discovery time.
  pub asset: String,

  #[serde(default)]
  pub architecture: Option<String>,

  #[serde(default)]
  pub scope: Option<String>,

  #[serde(default)]
  pub installer_type: Option<String>,
}

fn default_branch() -> String {
  "master".to_string()
}

fn default_locale() -> String {
  "en-US".to_string()
}

fn default_checkpoint_dir() -> PathBuf {
  PathBuf::from(".")
}

impl Config {
  pub fn load(path: &Path) -> Result<Self> {
    let content =
      fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const EXAMPLE: &str = r#"
benign_authors = ["john-preston"]

[catalog]
owner = "microsoft"
repo = "winget-pkgs"

[[package]]
moniker = "telegram"
identifier = "Telegram.TelegramDesktop"
owner_and_repo = "telegramdesktop/tdesktop"
pre_release = true

[[package.installer]]
asset = "tsetup.{version}.exe"
architecture = "x86"
"#;

  #[test]
  fn parses_example() {
    let config: Config = toml::from_str(EXAMPLE).unwrap();
    assert_eq!(config.catalog.owner, "microsoft");
    assert_eq!(config.catalog.default_branch, "master");
    assert_eq!(config.benign_authors, vec!["john-preston".to_string()]);

    let package = &config.packages[0];
    assert_eq!(package.locale, "en-US");
    assert!(package.pre_release);
    assert_eq!(package.installers[0].asset, "tsetup.{version}.exe");
  }

  #[test]
  fn unknown_keys_are_rejected() {
    let result: Result<Config, _> = toml::from_str("[catalog]\nowner = \"a\"\nrepo = \"b\"\ntypo = 1\n");
    assert!(result.is_err());
  }
}
