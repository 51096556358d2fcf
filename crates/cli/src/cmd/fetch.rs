//! Implementation of the `kiln fetch` command.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use kiln_lib::ChecksumFetcher;
use kiln_lib::consts::{FETCH_MAX_RETRIES, FETCH_RETRY_DELAY_MS};
use kiln_lib::platform::paths;

use crate::output::{OutputFormat, print_json};

#[derive(Debug, Serialize)]
struct Fetched {
  url: String,
  path: String,
}

/// Download `url` into the verified cache and print the cached path.
pub fn cmd_fetch(url: &str, digest: &str, cache: Option<PathBuf>, format: OutputFormat) -> Result<()> {
  let cache = cache.unwrap_or_else(paths::downloads_dir);
  let fetcher =
    ChecksumFetcher::new(cache)?.with_retries(FETCH_MAX_RETRIES, Duration::from_millis(FETCH_RETRY_DELAY_MS));

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let path = rt.block_on(fetcher.fetch(url, digest))?;

  let fetched = Fetched {
    url: url.to_string(),
    path: path.display().to_string(),
  };
  if format.is_json() {
    print_json(&fetched)?;
  } else {
    // bare path on stdout so it can be captured by scripts
    println!("{}", fetched.path);
  }
  Ok(())
}
