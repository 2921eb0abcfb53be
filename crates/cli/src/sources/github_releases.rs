//! Discovery over the GitHub releases API.
//!
//! Generic collaborator for packages whose installers are release
//! assets: resolves the newest release (or newest pre-release), maps
//! asset-name templates to download URLs, carries the release body as
//! release notes, and primes the checksum cache from asset digests
//! when the API provides them.

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

use wingup_core::{ChecksumCache, Installer, PackageVersion, ReleaseNotes, UpdateArgs};
use wingup_github::GitHubClient;

use crate::config::PackageConfig;
use crate::source::PackageSource;

pub struct GithubReleasesSource<'a> {
  client: &'a GitHubClient,
  package: &'a PackageConfig,
  release: Option<Value>,
  version: Option<String>,
}

impl<'a> GithubReleasesSource<'a> {
  pub fn new(client: &'a GitHubClient, package: &'a PackageConfig) -> Self {
    Self {
      client,
      package,
      release: None,
      version: None,
    }
  }

  fn release(&mut self) -> Result<&Value> {
    if self.release.is_none() {
      let repo = &self.package.owner_and_repo;
      let release = if self.package.pre_release {
        let releases = self.client.get(&format!("/repos/{repo}/releases"))?;
        releases
          .as_array()
          .and_then(|list| list.first())
          .cloned()
          .ok_or_else(|| anyhow!("{repo} has no releases"))?
      } else {
        self.client.get(&format!("/repos/{repo}/releases/latest"))?
      };
      self.release = Some(release);
    }
    Ok(self.release.get_or_insert_with(Value::default))
  }

  fn version(&mut self) -> Result<String> {
    if let Some(version) = &self.version {
      return Ok(version.clone());
    }
    let tag = self.release()?["tag_name"]
      .as_str()
      .context("release has no tag name")?;
    let version = tag.strip_prefix('v').unwrap_or(tag).to_string();
    self.version = Some(version.clone());
    Ok(version)
  }

  fn assets(&mut self) -> Result<BTreeMap<String, Value>> {
    Ok(
      self
        .release()?["assets"]
        .as_array()
        .map(|assets| {
          assets
            .iter()
            .filter_map(|asset| {
              asset["name"]
                .as_str()
                .map(|name| (name.to_string(), asset.clone()))
            })
            .collect()
        })
        .unwrap_or_default(),
    )
  }

  /// Seed the checksum cache from asset digests the API already
  /// reports, saving a download per installer where present.
  pub fn prime_cache(&mut self, cache: &mut ChecksumCache) -> Result<()> {
    for (name, asset) in self.assets()? {
      let (Some(url), Some(digest)) = (asset["browser_download_url"].as_str(), asset["digest"].as_str())
      else {
        continue;
      };
      if let Some(sha256) = digest.strip_prefix("sha256:") {
        debug!(asset = %name, "priming checksum cache from release metadata");
        cache.insert(
          url.to_string(),
          wingup_core::ArtifactDigest {
            sha256: sha256.to_ascii_uppercase(),
            last_modified: None,
          },
        );
      }
    }
    Ok(())
  }
}

impl PackageSource for GithubReleasesSource<'_> {
  fn moniker(&self) -> &str {
    &self.package.moniker
  }

  fn identifier(&self) -> &str {
    &self.package.identifier
  }

  fn latest_version(&mut self) -> Result<PackageVersion> {
    let version = self.version()?;
    PackageVersion::from_str(&version)
      .with_context(|| format!("release tag '{version}' is not a version"))
  }

  fn has_release_notes(&mut self) -> Result<bool> {
    let body = self.release()?["body"].as_str().unwrap_or_default();
    Ok(!body.trim().is_empty())
  }

  fn installers(&mut self) -> Result<Vec<Installer>> {
    let version = self.version()?;
    let assets = self.assets()?;

    let mut installers = Vec::with_capacity(self.package.installers.len());
    for template in &self.package.installers {
      let filename = template.asset.replace("{version}", &version);
      let Some(url) = assets
        .get(&filename)
        .and_then(|asset| asset["browser_download_url"].as_str())
      else {
        bail!("release {version} has no asset named '{filename}'");
      };
      installers.push(Installer {
        architecture: template.architecture.clone(),
        scope: template.scope.clone(),
        installer_type: template.installer_type.clone(),
        installer_url: url.to_string(),
        ..Installer::default()
      });
    }
    Ok(installers)
  }

  fn update_args(&mut self) -> Result<UpdateArgs> {
    let release = self.release()?;
    let body = release["body"].as_str().unwrap_or_default().to_string();
    let url = release["html_url"].as_str().unwrap_or_default().to_string();

    let mut args = UpdateArgs {
      owner_and_repo: Some(self.package.owner_and_repo.clone()),
      keep_notes_on_version_prefix: self.package.keep_notes_on_version_prefix.clone(),
      ..UpdateArgs::default()
    };
    if !body.trim().is_empty() {
      args.release_notes.insert(
        self.package.locale.clone(),
        ReleaseNotes { text: body, url },
      );
    }
    Ok(args)
  }
}
