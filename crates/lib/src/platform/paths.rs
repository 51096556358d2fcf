use std::path::PathBuf;

use crate::consts::{APP_NAME, CACHE_DIR_ENV, WORK_DIR_ENV};

/// Returns the user's home directory, or `/` when `HOME` is unset.
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("/"))
}

/// Returns the directory for cache files for the application.
///
/// `KILN_CACHE_DIR` wins, then `$XDG_CACHE_HOME/kiln`, then `~/.cache/kiln`.
pub fn cache_dir() -> PathBuf {
  if let Some(dir) = std::env::var_os(CACHE_DIR_ENV) {
    return PathBuf::from(dir);
  }
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Returns the verified download cache.
pub fn downloads_dir() -> PathBuf {
  cache_dir().join("downloads")
}

/// Returns the scratch area where per-run stage roots and logs live.
pub fn work_dir() -> PathBuf {
  std::env::var_os(WORK_DIR_ENV)
    .map(PathBuf::from)
    .unwrap_or_else(|| std::env::temp_dir().join(APP_NAME))
}
