use std::fs;

use kiln_lib::{Builder, StageId};

use super::common::*;

fn ids(names: &[&str]) -> Vec<StageId> {
  names.iter().map(|n| StageId::from(*n)).collect()
}

#[tokio::test]
async fn package_contains_outputs_of_both_branches() {
  let ws = Workspace::new();
  let builder = Builder::new(ws.config());

  let outcome = builder
    .build(&toolchain(), None, &no_overrides(), &ws.output())
    .await
    .unwrap();

  assert_eq!(outcome.archive, ws.output().join("cross-tools_1.0_arm64.deb"));
  assert_eq!(outcome.report.waves, vec![
    ids(&["base"]),
    ids(&["c-tools", "rust-tools"]),
    ids(&["pack"]),
  ]);

  // the terminal stage recorded each copy into the manifest as it ran
  assert_eq!(outcome.manifest.version.as_deref(), Some("1.0"));
  assert_eq!(outcome.manifest.contents, vec!["/pkg/DEBIAN", "/pkg", "/pkg"]);

  let members = deb_members(&outcome.archive);
  let names: Vec<&str> = members.iter().map(|(n, _)| n.as_str()).collect();
  assert_eq!(names, vec!["debian-binary", "control.tar.gz", "data.tar.gz"]);

  let data = tar_files(member(&members, "data.tar.gz"));
  assert_eq!(data["usr/bin/hello-c"], b"int main(void) { return 0; }\n");
  assert_eq!(data["usr/bin/hello-rs"], b"fn main() {}\n");
  assert!(!data.keys().any(|path| path.starts_with("DEBIAN")));

  let control = tar_files(member(&members, "control.tar.gz"));
  let text = String::from_utf8(control["control"].clone()).unwrap();
  assert!(text.starts_with("Package: cross-tools\nVersion: 1.0\nArchitecture: arm64\n"));
  assert!(text.contains("Section: devel\n"));
  let md5sums = String::from_utf8(control["md5sums"].clone()).unwrap();
  assert!(md5sums.lines().any(|line| line.ends_with("  usr/bin/hello-c")));
}

#[tokio::test]
async fn layered_stages_inherit_base_view() {
  let ws = Workspace::new();
  let builder = Builder::new(ws.config());

  let outcome = builder
    .build(&toolchain(), Some(&StageId::from("c-tools")), &no_overrides(), &ws.output())
    .await;

  // c-tools has no installed tree of its own, so packaging it fails, but the stage ran
  assert!(outcome.is_err());
  let artifact = builder.store().get(&StageId::from("c-tools"), "/out/usr/bin/hello-c").unwrap();
  assert!(artifact.view().root_is_file());
  assert!(!builder.store().has(&StageId::from("rust-tools")));
}

#[tokio::test]
async fn rebuilds_are_byte_identical() {
  let first = Workspace::new();
  let second = Workspace::new();

  let a = Builder::new(first.config())
    .build(&toolchain(), None, &no_overrides(), &first.output())
    .await
    .unwrap();
  let b = Builder::new(second.config())
    .build(&toolchain(), None, &no_overrides(), &second.output())
    .await
    .unwrap();

  assert_eq!(fs::read(&a.archive).unwrap(), fs::read(&b.archive).unwrap());
}

#[tokio::test]
async fn overrides_flow_into_manifest() {
  let ws = Workspace::new();
  let overrides = [("VERSION".to_string(), "2.5".to_string())].into_iter().collect();

  let outcome = Builder::new(ws.config())
    .build(&toolchain(), None, &overrides, &ws.output())
    .await
    .unwrap();

  assert_eq!(outcome.archive, ws.output().join("cross-tools_2.5_arm64.deb"));
}

#[tokio::test]
async fn run_directory_is_removed_unless_kept() {
  let ws = Workspace::new();
  Builder::new(ws.config())
    .build(&toolchain(), None, &no_overrides(), &ws.output())
    .await
    .unwrap();
  assert_eq!(ws.leftover_runs(), 0);

  let mut config = ws.config();
  config.keep_work_dir = true;
  let outcome = Builder::new(config)
    .build(&toolchain(), None, &no_overrides(), &ws.output())
    .await
    .unwrap();
  let run_dir = outcome.run_dir.unwrap();
  assert!(run_dir.join("logs/pack.log").is_file());
  assert!(run_dir.join("stages/base/root/etc/target").is_file());
}
