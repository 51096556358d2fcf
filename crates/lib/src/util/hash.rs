//! Hashing utilities for content addressing and download verification.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character SHA-256 hex digest
//! - `hash_file()`: streaming hash of a file on disk
//! - `hash_bytes()`: hash of an in-memory buffer
//! - `parse_sha256()`: validation of user-supplied digests

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const SHA256_HEX_LEN: usize = 64;

/// A full 64-character SHA-256 hash in lowercase hexadecimal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl ContentHash {
  /// First twelve characters, for log lines.
  pub fn short(&self) -> &str {
    &self.0[..self.0.len().min(12)]
  }

  /// Finish a running hasher into a `ContentHash`.
  pub fn from_hasher(hasher: Sha256) -> Self {
    ContentHash(hex::encode(hasher.finalize()))
  }
}

/// Hash a file's contents without loading it whole.
pub fn hash_file(path: &Path) -> std::io::Result<ContentHash> {
  let mut file = fs::File::open(path)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash::from_hasher(hasher))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash::from_hasher(hasher)
}

/// Normalize a user-supplied SHA-256 digest.
///
/// Accepts an optional `sha256:` prefix and either case; returns `None` unless
/// exactly 64 hex characters remain.
pub fn parse_sha256(digest: &str) -> Option<ContentHash> {
  let trimmed = digest.trim();
  let hex_part = trimmed.strip_prefix("sha256:").unwrap_or(trimmed);
  if hex_part.len() != SHA256_HEX_LEN || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
    return None;
  }
  Some(ContentHash(hex_part.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

  #[test]
  fn hash_bytes_matches_known_digest() {
    assert_eq!(hash_bytes(b"hello").0, HELLO_SHA256);
  }

  #[test]
  fn hash_file_matches_hash_bytes() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("blob");
    fs::write(&path, "hello").unwrap();
    assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"hello"));
  }

  #[test]
  fn hash_file_missing_is_error() {
    let temp = tempdir().unwrap();
    assert!(hash_file(&temp.path().join("absent")).is_err());
  }

  #[test]
  fn parse_sha256_accepts_prefix_and_uppercase() {
    let upper = HELLO_SHA256.to_ascii_uppercase();
    assert_eq!(parse_sha256(&upper).unwrap().0, HELLO_SHA256);
    assert_eq!(parse_sha256(&format!("sha256:{HELLO_SHA256}")).unwrap().0, HELLO_SHA256);
  }

  #[test]
  fn parse_sha256_rejects_malformed() {
    assert!(parse_sha256("").is_none());
    assert!(parse_sha256("abc123").is_none());
    assert!(parse_sha256(&format!("{}zz", &HELLO_SHA256[..62])).is_none());
    assert!(parse_sha256(&format!("md5:{HELLO_SHA256}")).is_none());
  }

  #[test]
  fn short_hash_truncates() {
    assert_eq!(hash_bytes(b"hello").short(), &HELLO_SHA256[..12]);
  }
}
