//! Installer artifact fetching and checksum derivation.
//!
//! Checksums are derived by streaming the installer binary through
//! SHA-256; the server's `Last-Modified` header doubles as the release
//! date source. A [`ChecksumCache`] sits in front of the network:
//! discovery collaborators that already know a digest (some release
//! APIs publish them) pre-populate it so the binary is never fetched
//! twice.

use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur while fetching an installer artifact.
#[derive(Debug, Error)]
pub enum FetchError {
  /// The download request failed at the transport level.
  #[error("failed to download '{url}': {source}")]
  Transport {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  /// The server answered with a non-success status.
  #[error("download of '{url}' failed with status {status}")]
  Status { url: String, status: u16 },

  /// Reading the response body failed mid-stream.
  #[error("failed while streaming '{url}': {source}")]
  Stream {
    url: String,
    #[source]
    source: std::io::Error,
  },
}

/// The digest of one downloaded artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDigest {
  /// Uppercase hexadecimal SHA-256, the catalog's checksum convention.
  pub sha256: String,
  /// The server's `Last-Modified` date, when it sent one.
  pub last_modified: Option<NaiveDate>,
}

/// Derives checksums for installer URLs.
pub trait ArtifactFetcher {
  fn fetch(&self, url: &str) -> Result<ArtifactDigest, FetchError>;
}

/// URL to digest cache, consulted before any fresh download.
///
/// Passed by reference into the manifest set builder; discovery
/// collaborators populate it opportunistically from API metadata.
#[derive(Debug, Default)]
pub struct ChecksumCache {
  entries: BTreeMap<String, ArtifactDigest>,
}

impl ChecksumCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, url: &str) -> Option<&ArtifactDigest> {
    self.entries.get(url)
  }

  pub fn insert(&mut self, url: impl Into<String>, digest: ArtifactDigest) {
    self.entries.insert(url.into(), digest);
  }

  /// Fetch through the cache, recording fresh results.
  pub fn fetch_cached(
    &mut self,
    fetcher: &dyn ArtifactFetcher,
    url: &str,
  ) -> Result<ArtifactDigest, FetchError> {
    if let Some(digest) = self.entries.get(url) {
      debug!(url, "checksum cache hit");
      return Ok(digest.clone());
    }
    let digest = fetcher.fetch(url)?;
    self.entries.insert(url.to_string(), digest.clone());
    Ok(digest)
  }
}

/// Streaming HTTP fetcher.
pub struct HttpFetcher {
  client: reqwest::blocking::Client,
}

impl HttpFetcher {
  /// Build a fetcher with a generous timeout; installer binaries run
  /// to hundreds of megabytes.
  pub fn new() -> Result<Self, reqwest::Error> {
    let client = reqwest::blocking::Client::builder()
      .timeout(Duration::from_secs(600))
      .build()?;
    Ok(Self { client })
  }

  pub fn with_client(client: reqwest::blocking::Client) -> Self {
    Self { client }
  }
}

impl ArtifactFetcher for HttpFetcher {
  fn fetch(&self, url: &str) -> Result<ArtifactDigest, FetchError> {
    info!(url, "downloading installer");

    let response = self.client.get(url).send().map_err(|source| FetchError::Transport {
      url: url.to_string(),
      source,
    })?;

    let status = response.status();
    if !status.is_success() {
      return Err(FetchError::Status {
        url: url.to_string(),
        status: status.as_u16(),
      });
    }

    let last_modified = response
      .headers()
      .get(reqwest::header::LAST_MODIFIED)
      .and_then(|value| value.to_str().ok())
      .and_then(parse_http_date);

    let mut hasher = Sha256::new();
    let mut reader = response;
    let mut buffer = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
      let read = reader.read(&mut buffer).map_err(|source| FetchError::Stream {
        url: url.to_string(),
        source,
      })?;
      if read == 0 {
        break;
      }
      hasher.update(&buffer[..read]);
      total += read as u64;
    }

    let sha256 = hex::encode_upper(hasher.finalize());
    debug!(url, bytes = total, sha256 = %sha256, "download hashed");

    Ok(ArtifactDigest { sha256, last_modified })
  }
}

/// Parse an HTTP date header (`Tue, 07 May 2024 18:31:06 GMT`).
fn parse_http_date(value: &str) -> Option<NaiveDate> {
  chrono::DateTime::parse_from_rfc2822(value)
    .ok()
    .map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_http_date() {
    assert_eq!(
      parse_http_date("Tue, 07 May 2024 18:31:06 GMT"),
      Some(NaiveDate::from_ymd_opt(2024, 5, 7).unwrap())
    );
    assert_eq!(parse_http_date("yesterday"), None);
  }

  #[test]
  fn cache_hit_skips_fetcher() {
    struct Panicking;
    impl ArtifactFetcher for Panicking {
      fn fetch(&self, url: &str) -> Result<ArtifactDigest, FetchError> {
        panic!("unexpected fetch of {url}");
      }
    }

    let mut cache = ChecksumCache::new();
    cache.insert(
      "https://example.com/app.exe",
      ArtifactDigest {
        sha256: "AB".to_string(),
        last_modified: None,
      },
    );
    let digest = cache.fetch_cached(&Panicking, "https://example.com/app.exe").unwrap();
    assert_eq!(digest.sha256, "AB");
  }

  #[test]
  fn fresh_fetch_is_recorded() {
    struct Fixed;
    impl ArtifactFetcher for Fixed {
      fn fetch(&self, _url: &str) -> Result<ArtifactDigest, FetchError> {
        Ok(ArtifactDigest {
          sha256: "CD".to_string(),
          last_modified: None,
        })
      }
    }

    let mut cache = ChecksumCache::new();
    cache.fetch_cached(&Fixed, "https://example.com/app.exe").unwrap();
    assert_eq!(cache.get("https://example.com/app.exe").unwrap().sha256, "CD");
  }

  mod http {
    use super::*;

    #[test]
    fn streams_and_hashes() {
      let mut server = mockito::Server::new();
      let body = b"installer bytes";
      let _mock = server
        .mock("GET", "/app.exe")
        .with_status(200)
        .with_header("Last-Modified", "Tue, 07 May 2024 18:31:06 GMT")
        .with_body(body)
        .create();

      let fetcher = HttpFetcher::new().unwrap();
      let digest = fetcher.fetch(&format!("{}/app.exe", server.url())).unwrap();

      let mut hasher = Sha256::new();
      hasher.update(body);
      assert_eq!(digest.sha256, hex::encode_upper(hasher.finalize()));
      assert_eq!(digest.last_modified, NaiveDate::from_ymd_opt(2024, 5, 7));
    }

    #[test]
    fn non_success_status_is_fatal() {
      let mut server = mockito::Server::new();
      let _mock = server.mock("GET", "/gone.exe").with_status(404).create();

      let fetcher = HttpFetcher::new().unwrap();
      let err = fetcher.fetch(&format!("{}/gone.exe", server.url())).unwrap_err();
      assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }
  }
}
