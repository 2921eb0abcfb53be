use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wingup_core::{ChecksumCache, HttpFetcher};
use wingup_github::{Catalog, GitHubCatalog, GitHubClient, Outcome, Reconciler, sweep};

mod checkpoint;
mod config;
mod driver;
mod output;
mod source;
mod sources;

use config::Config;
use driver::PackageRun;
use sources::GithubReleasesSource;

/// wingup - winget manifest update automation
#[derive(Parser)]
#[command(name = "wingup")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Path to the configuration file
  #[arg(long, default_value = "wingup.toml")]
  config: PathBuf,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .without_time()
    .init();

  let cli = Cli::parse();
  let config = Config::load(&cli.config)?;

  let token = std::env::var("GITHUB_TOKEN").context("GITHUB_TOKEN is not set")?;
  let fork_owner = match &config.catalog.fork_owner {
    Some(owner) => owner.clone(),
    None => std::env::var("GITHUB_REPOSITORY_OWNER")
      .context("set catalog.fork_owner or GITHUB_REPOSITORY_OWNER")?,
  };

  let client = GitHubClient::new(token)?;
  let catalog = GitHubCatalog::new(
    client.clone(),
    config.catalog.owner.clone(),
    config.catalog.repo.clone(),
    fork_owner,
    config.catalog.default_branch.clone(),
  );
  let official = format!("{}/{}", config.catalog.owner, config.catalog.repo);

  sweep(&catalog, &official)?;

  let fetcher = HttpFetcher::new()?;
  let mut cache = ChecksumCache::new();
  let mut failures: Vec<(String, anyhow::Error)> = Vec::new();

  for package in &config.packages {
    output::print_info(&format!("updating {}", package.identifier));

    let mut source = GithubReleasesSource::new(&client, package);
    let run = run_one(&mut source, &catalog, &fetcher, &mut cache, &config);

    match run {
      Ok(PackageRun::Unchanged) => output::print_success(&format!("{}: up to date", package.moniker)),
      Ok(PackageRun::Reconciled(outcome)) => report(&package.moniker, &outcome),
      Err(error) => {
        output::print_error(&format!("{}: {error:#}", package.moniker));
        failures.push((package.moniker.clone(), error));
      }
    }
  }

  catalog.delete_fork_if_unused()?;

  if !failures.is_empty() {
    bail!(
      "{} of {} packages failed: {}",
      failures.len(),
      config.packages.len(),
      failures
        .iter()
        .map(|(moniker, _)| moniker.as_str())
        .collect::<Vec<_>>()
        .join(", ")
    );
  }
  Ok(())
}

fn run_one(
  source: &mut GithubReleasesSource<'_>,
  catalog: &dyn Catalog,
  fetcher: &HttpFetcher,
  cache: &mut ChecksumCache,
  config: &Config,
) -> Result<PackageRun> {
  source.prime_cache(cache)?;
  let mut audit = output::PrintAudit;
  let mut reconciler = Reconciler {
    catalog,
    fetcher,
    cache,
    benign_authors: &config.benign_authors,
    audit: &mut audit,
  };
  driver::run_package(source, &config.checkpoint_dir, &mut reconciler)
}

fn report(moniker: &str, outcome: &Outcome) {
  match outcome {
    Outcome::UpToDate => output::print_success(&format!("{moniker}: catalog already up to date")),
    Outcome::UpdatedExisting { commit_url } => {
      output::print_success(&format!("{moniker}: updated existing proposal ({commit_url})"));
    }
    Outcome::Opened { proposal_url } => {
      output::print_success(&format!("{moniker}: opened proposal {proposal_url}"));
    }
    Outcome::Blocked { proposal } => {
      output::print_warning(&format!("{moniker}: waiting on proposal #{proposal}"));
    }
  }
}
