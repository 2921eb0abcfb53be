//! Remote catalog gateway.
//!
//! The [`Catalog`] trait is the seam between the reconciler and the
//! network: everything that reads or mutates the remote catalog goes
//! through it, so scenario tests can substitute an in-memory fake.
//! [`GitHubCatalog`] is the production implementation, backed by the
//! REST and GraphQL APIs of a winget-pkgs style repository and a
//! per-automation-identity fork.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use wingup_core::ManifestSet;

use crate::client::{ClientError, GitHubClient};

/// Gateway failures: transport/API errors or a response whose shape
/// does not match what the queries promise.
#[derive(Debug, Error)]
pub enum GatewayError {
  #[error(transparent)]
  Client(#[from] ClientError),

  #[error("unexpected response shape for {context}")]
  Shape { context: &'static str },
}

fn shape(context: &'static str) -> GatewayError {
  GatewayError::Shape { context }
}

/// Lifecycle state of an existing proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalState {
  Open,
  Closed,
  Merged,
}

impl ProposalState {
  fn parse(raw: &str) -> Option<Self> {
    match raw {
      "OPEN" => Some(Self::Open),
      "CLOSED" => Some(Self::Closed),
      "MERGED" => Some(Self::Merged),
      _ => None,
    }
  }
}

/// Head branch of a proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRef {
  pub name: String,
  pub sha: String,
}

/// One existing pull request against the catalog.
#[derive(Debug, Clone)]
pub struct Proposal {
  pub number: u64,
  pub title: String,
  pub state: ProposalState,
  pub url: String,
  pub head_ref: Option<BranchRef>,
  pub head_repository_owner: String,
  pub author: String,
}

/// One entry of a catalog directory listing. Files carry their text;
/// subdirectories carry `None`.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
  pub name: String,
  pub text: Option<String>,
}

/// State of the automation identity's fork.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForkStatus {
  Missing,
  /// The fork exists but has no default branch, which GitHub reports
  /// for repositories whose backend storage is broken.
  Empty,
  Ready { default_branch: String },
}

/// A proposal associated with a fork branch, as seen by maintenance.
#[derive(Debug, Clone)]
pub struct AssociatedProposal {
  pub title: String,
  pub url: String,
  pub state: ProposalState,
  pub repository: String,
}

/// One branch of the fork with its associated proposals.
#[derive(Debug, Clone)]
pub struct ForkBranch {
  pub name: String,
  pub proposals: Vec<AssociatedProposal>,
}

/// Path of a package's manifest directory, or of one version within it.
pub fn manifest_path(identifier: &str, version: Option<&str>) -> String {
  let shard = identifier
    .chars()
    .next()
    .map(|c| c.to_ascii_lowercase())
    .unwrap_or('_');
  let base = format!("manifests/{shard}/{}", identifier.replace('.', "/"));
  match version {
    Some(version) => format!("{base}/{version}"),
    None => base,
  }
}

/// Everything the reconciler and the maintenance sweep need from the
/// remote catalog.
pub trait Catalog {
  /// Login of the automation identity that owns the fork.
  fn fork_owner(&self) -> &str;

  /// Open and closed proposals whose title mentions the identifier
  /// and version.
  fn search_proposals(&self, identifier: &str, version: &str) -> Result<Vec<Proposal>, GatewayError>;

  /// Commit sha at the tip of the catalog's default branch.
  fn default_branch_sha(&self) -> Result<String, GatewayError>;

  /// List `path` at `commit`. Missing directories come back empty.
  fn read_directory(&self, commit: &str, path: &str) -> Result<Vec<DirectoryEntry>, GatewayError>;

  /// Manifest documents under `path` at `commit`.
  fn read_manifests(&self, commit: &str, path: &str) -> Result<ManifestSet, GatewayError> {
    Ok(
      self
        .read_directory(commit, path)?
        .into_iter()
        .filter_map(|entry| entry.text.map(|text| (entry.name, text)))
        .collect(),
    )
  }

  /// Names of the subdirectories under `path` at `commit`.
  fn list_subdirectories(&self, commit: &str, path: &str) -> Result<Vec<String>, GatewayError> {
    Ok(
      self
        .read_directory(commit, path)?
        .into_iter()
        .filter(|entry| entry.text.is_none())
        .map(|entry| entry.name)
        .collect(),
    )
  }

  /// Fork the catalog under the automation identity. Idempotent; a
  /// fork created here is marked retained for this run.
  fn create_fork(&self) -> Result<(), GatewayError>;

  /// Create a branch on the fork pointing at `sha`.
  fn create_branch(&self, name: &str, sha: &str) -> Result<(), GatewayError>;

  /// Commit `manifests` under `path` onto a fork branch. Returns the
  /// commit URL.
  fn create_commit(
    &self,
    branch: &str,
    message: &str,
    path: &str,
    manifests: &ManifestSet,
    head_sha: &str,
  ) -> Result<String, GatewayError>;

  /// Open a proposal from a fork branch against the default branch.
  /// Returns the proposal URL.
  fn create_proposal(&self, title: &str, branch: &str) -> Result<String, GatewayError>;

  fn is_proposal_open(&self, number: u64) -> Result<bool, GatewayError>;

  /// Fork existence probe; remembers the fork's id when found.
  fn fork_status(&self) -> Result<ForkStatus, GatewayError>;

  /// Branches of the fork with their associated proposals.
  fn list_fork_branches(&self) -> Result<Vec<ForkBranch>, GatewayError>;

  fn delete_branches(&self, names: &[String]) -> Result<(), GatewayError>;

  /// Mark the fork as still needed so end-of-run disposal keeps it.
  fn retain_fork(&self);

  fn delete_fork(&self) -> Result<(), GatewayError>;

  /// Delete the fork unless it was created or marked retained during
  /// this run. Returns whether a deletion happened.
  fn delete_fork_if_unused(&self) -> Result<bool, GatewayError>;
}

const FORK_SETTLE: Duration = Duration::from_secs(5);

struct ForkState {
  repo_id: Option<String>,
  retained: bool,
}

/// Production gateway against the GitHub API.
pub struct GitHubCatalog {
  client: GitHubClient,
  official_owner: String,
  official_repo: String,
  fork_owner: String,
  default_branch: String,
  fork: Mutex<ForkState>,
}

impl GitHubCatalog {
  pub fn new(
    client: GitHubClient,
    official_owner: impl Into<String>,
    official_repo: impl Into<String>,
    fork_owner: impl Into<String>,
    default_branch: impl Into<String>,
  ) -> Self {
    Self {
      client,
      official_owner: official_owner.into(),
      official_repo: official_repo.into(),
      fork_owner: fork_owner.into(),
      default_branch: default_branch.into(),
      fork: Mutex::new(ForkState {
        repo_id: None,
        retained: false,
      }),
    }
  }

  fn official(&self) -> String {
    format!("{}/{}", self.official_owner, self.official_repo)
  }

  fn fork_state(&self) -> std::sync::MutexGuard<'_, ForkState> {
    // Single-threaded process; the lock is plain interior mutability.
    match self.fork.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  fn directory_query(&self, commit: &str, path: &str) -> Result<Value, GatewayError> {
    self
      .client
      .graphql(
        "query DirectoryContent($owner: String!, $name: String!, $expression: String!) { \
         repository(owner: $owner, name: $name) { object(expression: $expression) { ... on Tree { \
         entries { name object { ... on Blob { text } } } } } } }",
        json!({
          "owner": self.official_owner,
          "name": self.official_repo,
          "expression": format!("{commit}:{path}"),
        }),
        None,
      )
      .map_err(Into::into)
  }
}

impl Catalog for GitHubCatalog {
  fn fork_owner(&self) -> &str {
    &self.fork_owner
  }

  fn search_proposals(&self, identifier: &str, version: &str) -> Result<Vec<Proposal>, GatewayError> {
    let data = self.client.graphql(
      "query ProposalSearch($q: String!) { search(query: $q, type: ISSUE, first: 30) { \
       nodes { ... on PullRequest { \
       number title state url headRef { name target { oid } } headRepositoryOwner { login } author { login } \
       } } } }",
      json!({
        "q": format!("repo:{} type:pr in:title {identifier} {version}", self.official()),
      }),
      None,
    )?;

    let nodes = data["search"]["nodes"].as_array().ok_or_else(|| shape("proposal search"))?;
    let mut proposals = Vec::with_capacity(nodes.len());
    for node in nodes {
      // Non-PR search hits deserialize as empty objects; skip them.
      let Some(number) = node["number"].as_u64() else {
        continue;
      };
      let state = node["state"]
        .as_str()
        .and_then(ProposalState::parse)
        .ok_or_else(|| shape("proposal state"))?;
      let head_ref = match &node["headRef"] {
        Value::Null => None,
        value => Some(BranchRef {
          name: value["name"].as_str().ok_or_else(|| shape("head ref name"))?.to_string(),
          sha: value["target"]["oid"]
            .as_str()
            .ok_or_else(|| shape("head ref target"))?
            .to_string(),
        }),
      };
      proposals.push(Proposal {
        number,
        title: node["title"].as_str().unwrap_or_default().to_string(),
        state,
        url: node["url"].as_str().unwrap_or_default().to_string(),
        head_ref,
        head_repository_owner: node["headRepositoryOwner"]["login"]
          .as_str()
          .unwrap_or_default()
          .to_string(),
        author: node["author"]["login"].as_str().unwrap_or_default().to_string(),
      });
    }
    Ok(proposals)
  }

  fn default_branch_sha(&self) -> Result<String, GatewayError> {
    let refs = self.client.get(&format!(
      "/repos/{}/git/matching-refs/heads/{}",
      self.official(),
      self.default_branch
    ))?;
    let refs = refs.as_array().ok_or_else(|| shape("matching refs"))?;
    match refs.as_slice() {
      [only] => only["object"]["sha"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| shape("ref sha")),
      _ => Err(shape("matching refs")),
    }
  }

  fn read_directory(&self, commit: &str, path: &str) -> Result<Vec<DirectoryEntry>, GatewayError> {
    let data = self.directory_query(commit, path)?;
    let object = &data["repository"]["object"];
    if object.is_null() {
      return Ok(Vec::new());
    }
    let entries = object["entries"].as_array().ok_or_else(|| shape("tree entries"))?;
    entries
      .iter()
      .map(|entry| {
        Ok(DirectoryEntry {
          name: entry["name"].as_str().ok_or_else(|| shape("entry name"))?.to_string(),
          text: entry["object"]["text"].as_str().map(str::to_string),
        })
      })
      .collect()
  }

  fn create_fork(&self) -> Result<(), GatewayError> {
    let mut fork = self.fork_state();
    fork.retained = true;
    if fork.repo_id.is_some() {
      return Ok(());
    }
    info!("creating fork");
    let created = self.client.post(
      &format!("/repos/{}/forks", self.official()),
      &json!({ "default_branch_only": true }),
    )?;
    fork.repo_id = Some(
      created["node_id"]
        .as_str()
        .ok_or_else(|| shape("fork node id"))?
        .to_string(),
    );

    // The fork never hosts anything but automation branches.
    let fork_repo = format!("/repos/{}/{}", self.fork_owner, self.official_repo);
    self.client.patch(
      &fork_repo,
      &json!({ "has_issues": false, "has_wiki": false, "has_projects": false }),
    )?;
    self
      .client
      .put(&format!("{fork_repo}/actions/permissions"), &json!({ "enabled": false }))?;

    debug!(settle_secs = FORK_SETTLE.as_secs(), "letting the fork settle");
    std::thread::sleep(FORK_SETTLE);
    Ok(())
  }

  fn create_branch(&self, name: &str, sha: &str) -> Result<(), GatewayError> {
    self.client.post(
      &format!("/repos/{}/{}/git/refs", self.fork_owner, self.official_repo),
      &json!({ "ref": format!("refs/heads/{name}"), "sha": sha }),
    )?;
    self.retain_fork();
    Ok(())
  }

  fn create_commit(
    &self,
    branch: &str,
    message: &str,
    path: &str,
    manifests: &ManifestSet,
    head_sha: &str,
  ) -> Result<String, GatewayError> {
    let additions: Vec<Value> = manifests
      .iter()
      .map(|(filename, content)| {
        json!({
          "path": format!("{path}/{filename}"),
          "contents": BASE64.encode(content),
        })
      })
      .collect();

    let data = self.client.graphql(
      "mutation CreateCommit($input: CreateCommitOnBranchInput!) { \
       createCommitOnBranch(input: $input) { commit { url } } }",
      json!({
        "input": {
          "branch": {
            "repositoryNameWithOwner": format!("{}/{}", self.fork_owner, self.official_repo),
            "branchName": branch,
          },
          "message": { "headline": message },
          "fileChanges": { "additions": additions },
          "expectedHeadOid": head_sha,
        }
      }),
      None,
    )?;
    data["createCommitOnBranch"]["commit"]["url"]
      .as_str()
      .map(str::to_string)
      .ok_or_else(|| shape("commit url"))
  }

  fn create_proposal(&self, title: &str, branch: &str) -> Result<String, GatewayError> {
    let body = run_link().unwrap_or_default();
    let created = self.client.post(
      &format!("/repos/{}/pulls", self.official()),
      &json!({
        "title": title,
        "head": format!("{}:{branch}", self.fork_owner),
        "body": body,
        "base": self.default_branch,
      }),
    )?;
    created["html_url"]
      .as_str()
      .map(str::to_string)
      .ok_or_else(|| shape("proposal url"))
  }

  fn is_proposal_open(&self, number: u64) -> Result<bool, GatewayError> {
    let issue = self.client.get(&format!("/repos/{}/issues/{number}", self.official()))?;
    Ok(issue["state"] == "open")
  }

  fn fork_status(&self) -> Result<ForkStatus, GatewayError> {
    let accept_not_found = |errors: &[Value]| {
      errors.len() == 1
        && errors[0]["type"] == "NOT_FOUND"
        && errors[0]["path"] == json!(["repository"])
    };
    let data = self.client.graphql(
      "query ForkStatus($owner: String!, $name: String!) { repository(owner: $owner, name: $name) { \
       id isEmpty defaultBranchRef { name } } }",
      json!({ "owner": self.fork_owner, "name": self.official_repo }),
      Some(&accept_not_found),
    )?;

    let repository = &data["repository"];
    if repository.is_null() {
      return Ok(ForkStatus::Missing);
    }
    let id = repository["id"].as_str().ok_or_else(|| shape("fork id"))?;
    self.fork_state().repo_id = Some(id.to_string());

    if repository["isEmpty"].as_bool().unwrap_or(false) {
      if !repository["defaultBranchRef"].is_null() {
        return Err(shape("empty fork with a default branch"));
      }
      return Ok(ForkStatus::Empty);
    }
    let default_branch = repository["defaultBranchRef"]["name"]
      .as_str()
      .ok_or_else(|| shape("fork default branch"))?;
    Ok(ForkStatus::Ready {
      default_branch: default_branch.to_string(),
    })
  }

  fn list_fork_branches(&self) -> Result<Vec<ForkBranch>, GatewayError> {
    let data = self.client.graphql(
      "query ForkBranches($owner: String!, $name: String!) { repository(owner: $owner, name: $name) { \
       refs(first: 100, refPrefix: \"refs/heads/\") { nodes { name \
       associatedPullRequests(first: 5) { nodes { title url state repository { nameWithOwner } } } \
       } } } }",
      json!({ "owner": self.fork_owner, "name": self.official_repo }),
      None,
    )?;

    let nodes = data["repository"]["refs"]["nodes"]
      .as_array()
      .ok_or_else(|| shape("fork refs"))?;
    nodes
      .iter()
      .map(|node| {
        let name = node["name"].as_str().ok_or_else(|| shape("branch name"))?.to_string();
        let proposals = node["associatedPullRequests"]["nodes"]
          .as_array()
          .ok_or_else(|| shape("associated proposals"))?
          .iter()
          .map(|pr| {
            Ok(AssociatedProposal {
              title: pr["title"].as_str().unwrap_or_default().to_string(),
              url: pr["url"].as_str().unwrap_or_default().to_string(),
              state: pr["state"]
                .as_str()
                .and_then(ProposalState::parse)
                .ok_or_else(|| shape("associated proposal state"))?,
              repository: pr["repository"]["nameWithOwner"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            })
          })
          .collect::<Result<Vec<_>, GatewayError>>()?;
        Ok(ForkBranch { name, proposals })
      })
      .collect()
  }

  fn delete_branches(&self, names: &[String]) -> Result<(), GatewayError> {
    let repo_id = self
      .fork_state()
      .repo_id
      .clone()
      .ok_or_else(|| shape("fork id for branch deletion"))?;
    let updates: Vec<Value> = names
      .iter()
      .map(|name| {
        json!({
          "name": format!("refs/heads/{name}"),
          "afterOid": "0".repeat(40),
        })
      })
      .collect();
    self.client.graphql(
      "mutation DeleteBranches($input: UpdateRefsInput!) { updateRefs(input: $input) { clientMutationId } }",
      json!({ "input": { "repositoryId": repo_id, "refUpdates": updates } }),
      None,
    )?;
    Ok(())
  }

  fn retain_fork(&self) {
    self.fork_state().retained = true;
  }

  fn delete_fork(&self) -> Result<(), GatewayError> {
    info!("deleting fork");
    self
      .client
      .delete(&format!("/repos/{}/{}", self.fork_owner, self.official_repo))?;
    self.fork_state().repo_id = None;
    Ok(())
  }

  fn delete_fork_if_unused(&self) -> Result<bool, GatewayError> {
    let (known, retained) = {
      let fork = self.fork_state();
      (fork.repo_id.is_some(), fork.retained)
    };
    if !known || retained {
      return Ok(false);
    }
    self.delete_fork()?;
    Ok(true)
  }
}

/// Link to the CI run that produced a proposal, when running inside
/// one.
fn run_link() -> Option<String> {
  let server = std::env::var("GITHUB_SERVER_URL").ok()?;
  let repository = std::env::var("GITHUB_REPOSITORY").ok()?;
  let run_id = std::env::var("GITHUB_RUN_ID").ok()?;
  Some(format!("Created in {server}/{repository}/actions/runs/{run_id}"))
}
