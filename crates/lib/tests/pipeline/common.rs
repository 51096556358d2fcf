use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use kiln_lib::{BuildConfig, BuildDescription};
use tempfile::TempDir;

/// Four stages: a shared base, two independent tool branches layered on it,
/// and a packaging stage that copies from both.
pub const TOOLCHAIN: &str = r#"
[package]
stage = "pack"
tree = "/pkg"
name = "cross-tools"
version = "${VERSION}"
architecture = "arm64"
maintainer = "Build Team <build@example.com>"
description = "Cross-compiled tools\nC and Rust utilities."

[[stage]]
name = "base"
base = { image = "scratch" }
env = { TARGET = "aarch64-linux-gnu" }
commands = ["mkdir -p etc && echo $TARGET > etc/target"]

[[stage]]
name = "c-tools"
base = { stage = "base" }
copy = [{ from = "local", src = "src/hello.c", dst = "/src/" }]
commands = [
  "mkdir -p out/usr/bin",
  "cp src/hello.c out/usr/bin/hello-c",
  "chmod 755 out/usr/bin/hello-c",
]
outputs = ["/out"]

[[stage]]
name = "rust-tools"
base = { stage = "base" }
copy = [{ from = "local", src = "src/hello.rs", dst = "/src/" }]
commands = [
  "mkdir -p out/usr/bin",
  "cp src/hello.rs out/usr/bin/hello-rs",
  "chmod 755 out/usr/bin/hello-rs",
]
outputs = ["/out"]

[[stage]]
name = "pack"
base = { image = "scratch" }
args = [{ name = "VERSION", default = "1.0" }]
copy = [
  { from = "local", src = "debian", dst = "/pkg/DEBIAN" },
  { from = "c-tools", src = "/out", dst = "/pkg" },
  { from = "rust-tools", src = "/out", dst = "/pkg" },
]
commands = ["test -x pkg/usr/bin/hello-c", "test -x pkg/usr/bin/hello-rs"]
outputs = ["/pkg"]
"#;

/// An isolated build context, work directory and output directory.
pub struct Workspace {
  pub temp: TempDir,
}

impl Workspace {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let context = temp.path().join("context");
    for (rel, contents) in [
      ("src/hello.c", "int main(void) { return 0; }\n"),
      ("src/hello.rs", "fn main() {}\n"),
      ("debian/control", "Package: cross-tools\nSection: devel\nPriority: optional\n"),
    ] {
      let path = context.join(rel);
      fs::create_dir_all(path.parent().unwrap()).unwrap();
      fs::write(path, contents).unwrap();
    }
    Self { temp }
  }

  pub fn context(&self) -> PathBuf {
    self.temp.path().join("context")
  }

  pub fn work_dir(&self) -> PathBuf {
    self.temp.path().join("work")
  }

  pub fn output(&self) -> PathBuf {
    self.temp.path().join("dist")
  }

  pub fn config(&self) -> BuildConfig {
    BuildConfig {
      parallelism: 2,
      work_dir: self.work_dir(),
      cache_dir: self.temp.path().join("cache"),
      context_dir: self.context(),
      fetch_retries: 0,
      fetch_retry_delay: Duration::from_millis(10),
      ..Default::default()
    }
  }

  /// Run directories left behind under the work directory.
  pub fn leftover_runs(&self) -> usize {
    fs::read_dir(self.work_dir()).map(|entries| entries.count()).unwrap_or(0)
  }
}

pub fn toolchain() -> BuildDescription {
  BuildDescription::parse(TOOLCHAIN).unwrap()
}

pub fn no_overrides() -> BTreeMap<String, String> {
  BTreeMap::new()
}

/// Members of a `.deb` in archive order.
pub fn deb_members(path: &Path) -> Vec<(String, Vec<u8>)> {
  let bytes = fs::read(path).unwrap();
  let mut archive = ar::Archive::new(&bytes[..]);
  let mut members = Vec::new();
  while let Some(entry) = archive.next_entry() {
    let mut entry = entry.unwrap();
    let name = String::from_utf8_lossy(entry.header().identifier()).to_string();
    let mut data = Vec::new();
    entry.read_to_end(&mut data).unwrap();
    members.push((name, data));
  }
  members
}

/// Paths and contents of regular files inside a gzip-compressed tar member.
pub fn tar_files(data: &[u8]) -> BTreeMap<String, Vec<u8>> {
  let mut archive = tar::Archive::new(GzDecoder::new(data));
  let mut files = BTreeMap::new();
  for entry in archive.entries().unwrap() {
    let mut entry = entry.unwrap();
    if entry.header().entry_type().is_file() {
      let path = entry.path().unwrap().to_string_lossy().trim_start_matches("./").to_string();
      let mut contents = Vec::new();
      entry.read_to_end(&mut contents).unwrap();
      files.insert(path, contents);
    }
  }
  files
}

pub fn member<'a>(members: &'a [(String, Vec<u8>)], name: &str) -> &'a [u8] {
  &members.iter().find(|(n, _)| n == name).unwrap().1
}
