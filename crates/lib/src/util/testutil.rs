//! Test helpers for building file trees on disk.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Write `(relative path, contents)` pairs under `root`, creating parent directories.
pub fn write_files(root: &Path, files: &[(&str, &str)]) {
  for (rel, contents) in files {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
  }
}

/// Write an executable file under `root`.
pub fn write_executable(root: &Path, rel: &str, contents: &str) {
  write_files(root, &[(rel, contents)]);
  fs::set_permissions(root.join(rel), fs::Permissions::from_mode(0o755)).unwrap();
}
