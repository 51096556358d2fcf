//! Shared test helpers for CLI integration tests.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Get path to a fixture directory or file.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

fn copy_tree(src: &Path, dst: &Path) {
  fs::create_dir_all(dst).unwrap();
  for entry in fs::read_dir(src).unwrap() {
    let entry = entry.unwrap();
    let target = dst.join(entry.file_name());
    if entry.file_type().unwrap().is_dir() {
      copy_tree(&entry.path(), &target);
    } else {
      fs::copy(entry.path(), &target).unwrap();
    }
  }
}

/// Isolated test environment.
///
/// Each test gets its own copy of a fixture project plus private work and
/// cache directories.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// Copy a fixture project into `<temp>/project`.
  pub fn from_fixture(name: &str) -> Self {
    let temp = TempDir::new().unwrap();
    copy_tree(&fixture_path(name), &temp.path().join("project"));
    Self { temp }
  }

  pub fn project(&self) -> PathBuf {
    self.temp.path().join("project")
  }

  pub fn description(&self) -> PathBuf {
    self.project().join("kiln.toml")
  }

  pub fn dist(&self) -> PathBuf {
    self.temp.path().join("dist")
  }

  pub fn work_dir(&self) -> PathBuf {
    self.temp.path().join("work")
  }

  /// Get a pre-configured Command for the kiln binary.
  ///
  /// Sets environment variables for isolated testing:
  /// - `KILN_WORK_DIR`: per-run stage roots and logs
  /// - `KILN_CACHE_DIR`: verified download cache
  pub fn kiln_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("kiln");
    cmd.env("KILN_WORK_DIR", self.work_dir());
    cmd.env("KILN_CACHE_DIR", self.temp.path().join("cache"));
    cmd.env("RUST_LOG", "warn");
    cmd
  }

  /// `kiln build <description> --output <dist>` plus extra arguments.
  pub fn build_cmd(&self, extra: &[&str]) -> Command {
    let mut cmd = self.kiln_cmd();
    cmd.arg("build").arg(self.description()).arg("--output").arg(self.dist());
    cmd.args(extra);
    cmd
  }
}
