//! Digest-verified downloads.
//!
//! `ChecksumFetcher` downloads external dependencies into a cache keyed by
//! their expected SHA-256 digest. Bytes are hashed as they stream into a
//! temporary file next to the cache entry; the file is renamed into place only
//! when the digest matches, so a mismatching download never leaves anything
//! behind and a cache entry always holds verified content.
//!
//! ```text
//! <cache>/sha256/<digest>
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::consts::{FETCH_CONNECT_TIMEOUT_SECS, FETCH_MAX_RETRIES, FETCH_RETRY_DELAY_MS};
use crate::util::hash::{ContentHash, hash_file, parse_sha256};

const USER_AGENT: &str = concat!("kiln/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("digest mismatch for {url}: expected {expected}, got {actual}")]
  DigestMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  #[error("network error fetching {url}: {message}")]
  Network { url: String, message: String },

  #[error("resource not found: {url}")]
  NotFound { url: String },

  #[error("invalid sha256 digest '{0}'")]
  InvalidDigest(String),

  #[error("failed to configure HTTP client: {0}")]
  Client(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl FetchError {
  /// Only transport-level failures are worth another attempt.
  pub fn is_transient(&self) -> bool {
    matches!(self, FetchError::Network { .. })
  }
}

#[derive(Debug, Clone)]
pub struct ChecksumFetcher {
  client: reqwest::Client,
  cache_dir: PathBuf,
  retries: u32,
  retry_delay: Duration,
}

impl ChecksumFetcher {
  pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .connect_timeout(Duration::from_secs(FETCH_CONNECT_TIMEOUT_SECS))
      .user_agent(USER_AGENT)
      .build()
      .map_err(|e| FetchError::Client(e.to_string()))?;
    Ok(Self {
      client,
      cache_dir: cache_dir.into(),
      retries: FETCH_MAX_RETRIES,
      retry_delay: Duration::from_millis(FETCH_RETRY_DELAY_MS),
    })
  }

  /// Retry transient failures `retries` times, waiting `delay * attempt` between tries.
  pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
    self.retries = retries;
    self.retry_delay = delay;
    self
  }

  pub fn cache_dir(&self) -> &Path {
    &self.cache_dir
  }

  /// Where verified content with `digest` lives.
  pub fn cached_path(&self, digest: &ContentHash) -> PathBuf {
    self.cache_dir.join("sha256").join(&digest.0)
  }

  /// Fetch `url` and verify it against `sha256`, returning the verified local path.
  ///
  /// Idempotent: once verified content is cached, later calls return it
  /// without touching the network.
  pub async fn fetch(&self, url: &str, sha256: &str) -> Result<PathBuf, FetchError> {
    let expected = parse_sha256(sha256).ok_or_else(|| FetchError::InvalidDigest(sha256.to_string()))?;
    let dest = self.cached_path(&expected);

    if self.cache_hit(&dest, &expected).await? {
      info!(url = %url, digest = %expected.short(), "using cached download");
      return Ok(dest);
    }

    if let Some(parent) = dest.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    let mut attempt: u32 = 0;
    loop {
      attempt += 1;
      match self.download(url, &expected, &dest).await {
        Ok(size) => {
          info!(url = %url, digest = %expected.short(), size, "download verified");
          return Ok(dest);
        }
        Err(e) if e.is_transient() && attempt <= self.retries => {
          let delay = self.retry_delay * attempt;
          warn!(url = %url, attempt, error = %e, delay = ?delay, "download failed, retrying");
          tokio::time::sleep(delay).await;
        }
        Err(e) => return Err(e),
      }
    }
  }

  /// True if `dest` exists and still hashes to `expected`. Corrupt entries are removed.
  async fn cache_hit(&self, dest: &Path, expected: &ContentHash) -> Result<bool, FetchError> {
    if !tokio::fs::try_exists(dest).await? {
      return Ok(false);
    }

    let path = dest.to_path_buf();
    let actual = tokio::task::spawn_blocking(move || hash_file(&path))
      .await
      .map_err(std::io::Error::other)??;

    if actual == *expected {
      return Ok(true);
    }

    warn!(path = ?dest, expected = %expected, actual = %actual, "cached download corrupt, discarding");
    tokio::fs::remove_file(dest).await?;
    Ok(false)
  }

  /// One download attempt. Returns the number of bytes written.
  async fn download(&self, url: &str, expected: &ContentHash, dest: &Path) -> Result<u64, FetchError> {
    let network = |e: reqwest::Error| FetchError::Network {
      url: url.to_string(),
      message: e.to_string(),
    };

    debug!(url = %url, "requesting");
    let mut response = self.client.get(url).send().await.map_err(network)?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
      return Err(FetchError::NotFound { url: url.to_string() });
    }
    if !status.is_success() {
      return Err(FetchError::Network {
        url: url.to_string(),
        message: format!("HTTP {}", status),
      });
    }

    let dir = dest.parent().unwrap_or(&self.cache_dir);
    let partial = tempfile::Builder::new().prefix(".partial-").tempfile_in(dir)?;
    let mut file = tokio::fs::File::from_std(partial.reopen()?);

    let mut hasher = Sha256::new();
    let mut size: u64 = 0;
    while let Some(chunk) = response.chunk().await.map_err(network)? {
      hasher.update(&chunk);
      file.write_all(&chunk).await?;
      size += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    let actual = ContentHash::from_hasher(hasher);
    if actual != *expected {
      // dropping `partial` deletes it
      return Err(FetchError::DigestMismatch {
        url: url.to_string(),
        expected: expected.0.clone(),
        actual: actual.0,
      });
    }

    partial.persist(dest).map_err(|e| FetchError::Io(e.error))?;
    Ok(size)
  }
}
