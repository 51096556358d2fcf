//! Build command integration tests.

use std::fs;

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn build_writes_package() {
  let env = TestEnv::from_fixture("toolchain");

  env
    .build_cmd(&[])
    .assert()
    .success()
    .stdout(predicate::str::contains("Built"))
    .stdout(predicate::str::is_match(r"Pruned:\s+docs").unwrap());

  assert!(env.dist().join("cross-tools_1.0_arm64.deb").is_file());
}

#[test]
fn build_json_reports_waves() {
  let env = TestEnv::from_fixture("toolchain");

  let output = env.build_cmd(&["--format", "json"]).output().unwrap();
  assert!(output.status.success());

  let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(summary["terminal"], "pack");
  assert_eq!(
    summary["waves"],
    serde_json::json!([["base"], ["c-tools", "rust-tools"], ["pack"]])
  );
  assert_eq!(summary["pruned"], serde_json::json!(["docs"]));
  assert_eq!(summary["contents"], serde_json::json!(["/pkg/DEBIAN", "/pkg", "/pkg"]));
}

#[test]
fn build_arg_override_changes_version() {
  let env = TestEnv::from_fixture("toolchain");

  env.build_cmd(&["--build-arg", "VERSION=2.1"]).assert().success();

  assert!(env.dist().join("cross-tools_2.1_arm64.deb").is_file());
}

#[test]
fn failing_stage_exits_with_stage_code() {
  let env = TestEnv::from_fixture("toolchain");

  env
    .build_cmd(&["--build-arg", "RUST_FAIL=1"])
    .assert()
    .code(5)
    .stderr(predicate::str::contains("stage 'rust-tools' failed"))
    .stderr(predicate::str::contains("command #1"));

  assert!(!env.dist().join("cross-tools_1.0_arm64.deb").exists());
}

#[test]
fn repeated_builds_are_identical() {
  let first = TestEnv::from_fixture("toolchain");
  let second = TestEnv::from_fixture("toolchain");

  first.build_cmd(&[]).assert().success();
  second.build_cmd(&["--jobs", "1"]).assert().success();

  let name = "cross-tools_1.0_arm64.deb";
  assert_eq!(
    fs::read(first.dist().join(name)).unwrap(),
    fs::read(second.dist().join(name)).unwrap()
  );
}

#[test]
fn keep_work_leaves_stage_logs() {
  let env = TestEnv::from_fixture("toolchain");

  env
    .build_cmd(&["--keep-work"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Run directory"));

  let runs: Vec<_> = fs::read_dir(env.work_dir()).unwrap().map(|e| e.unwrap().path()).collect();
  assert_eq!(runs.len(), 1);
  assert!(runs[0].join("logs/c-tools.log").is_file());
}

#[test]
fn missing_control_file_exits_with_manifest_code() {
  let env = TestEnv::from_fixture("toolchain");
  fs::remove_file(env.project().join("debian/control")).unwrap();
  fs::write(env.project().join("debian/conffiles"), "").unwrap();

  env
    .build_cmd(&[])
    .assert()
    .code(7)
    .stderr(predicate::str::contains("DEBIAN/control"));
}

#[test]
fn plan_lists_waves_for_fixture() {
  let env = TestEnv::from_fixture("toolchain");

  env
    .kiln_cmd()
    .arg("plan")
    .arg(env.description())
    .assert()
    .success()
    .stdout(predicate::str::contains("wave 1: c-tools, rust-tools"));
}
