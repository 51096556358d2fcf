use std::fs;

use kiln_lib::build::BuildError;
use kiln_lib::description::{BuildDescription, DescriptionError};
use kiln_lib::execute::ExecuteError;
use kiln_lib::fetch::FetchError;
use kiln_lib::graph::{BuildGraph, GraphError};
use kiln_lib::package::PackageError;
use kiln_lib::{Builder, Stage, StageId};
use tracing_test::traced_test;

use super::common::*;

#[tokio::test]
async fn failed_stage_aborts_and_keeps_earlier_artifacts() {
  let ws = Workspace::new();
  let description = BuildDescription::parse(&TOOLCHAIN.replace(
    "\"cp src/hello.rs out/usr/bin/hello-rs\",",
    "\"cp src/hello.rs out/usr/bin/hello-rs\", \"exit 9\",",
  ))
  .unwrap();
  let builder = Builder::new(ws.config());

  let err = builder
    .build(&description, None, &no_overrides(), &ws.output())
    .await
    .unwrap_err();

  assert_eq!(err.failed_stage(), Some(&StageId::from("rust-tools")));
  assert_eq!(err.exit_code(), 5);
  assert!(matches!(
    err,
    BuildError::Stage {
      error: ExecuteError::StageCommand { index: 2, status: Some(9), .. },
      ..
    }
  ));

  // the sibling already running drained, the dependent never started
  assert!(builder.store().has(&StageId::from("base")));
  assert!(builder.store().get(&StageId::from("c-tools"), "/out").is_ok());
  assert!(!builder.store().has(&StageId::from("pack")));

  assert!(!ws.output().exists() || fs::read_dir(ws.output()).unwrap().count() == 0);
  assert_eq!(ws.leftover_runs(), 1);
}

#[tokio::test]
async fn cycle_fails_before_any_work() {
  let ws = Workspace::new();
  let description = BuildDescription {
    graph: BuildGraph::from_stages(vec![
      Stage::from_image("a", "scratch").with_copy_from("b", "/out", "/in"),
      Stage::from_image("b", "scratch").with_copy_from("a", "/out", "/in"),
    ])
    .unwrap(),
    ..Default::default()
  };

  let err = Builder::new(ws.config())
    .build(&description, Some(&StageId::from("a")), &no_overrides(), &ws.output())
    .await
    .unwrap_err();

  assert!(matches!(
    err,
    BuildError::Graph(GraphError::CycleDetected { ref stages })
      if *stages == vec![StageId::from("a"), StageId::from("b")]
  ));
  assert_eq!(err.exit_code(), 3);
  assert!(!ws.work_dir().exists());
}

#[test]
fn forward_reference_maps_to_unknown_base_exit_code() {
  let err = BuildDescription::parse(
    r#"
[[stage]]
name = "pack"
base = { image = "scratch" }
copy = [{ from = "tools", src = "/out", dst = "/pkg" }]

[[stage]]
name = "tools"
base = { image = "scratch" }
"#,
  )
  .unwrap_err();

  assert!(matches!(err, DescriptionError::Graph(GraphError::UnknownBase { .. })));
  assert_eq!(BuildError::from(err).exit_code(), 4);
}

#[tokio::test]
async fn corrupted_download_fails_with_digest_mismatch() {
  let mut server = mockito::Server::new_async().await;
  server
    .mock("GET", "/sysroot.tar")
    .with_status(200)
    .with_body("tampered")
    .create_async()
    .await;

  let ws = Workspace::new();
  let description = BuildDescription::parse(&format!(
    r#"
[[stage]]
name = "sysroot"
base = {{ image = "scratch" }}
fetch = [{{ url = "{}/sysroot.tar", sha256 = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824", dest = "/dl/" }}]
"#,
    server.url()
  ))
  .unwrap();

  let err = Builder::new(ws.config())
    .build(&description, None, &no_overrides(), &ws.output())
    .await
    .unwrap_err();

  assert!(matches!(
    err,
    BuildError::Stage {
      error: ExecuteError::Fetch(FetchError::DigestMismatch { .. }),
      ..
    }
  ));
  assert_eq!(err.exit_code(), 6);
}

#[tokio::test]
async fn missing_control_file_writes_no_archive() {
  let ws = Workspace::new();
  fs::remove_file(ws.context().join("debian/control")).unwrap();
  fs::write(ws.context().join("debian/postinst"), "#!/bin/sh\n").unwrap();

  let err = Builder::new(ws.config())
    .build(&toolchain(), None, &no_overrides(), &ws.output())
    .await
    .unwrap_err();

  assert!(matches!(
    err,
    BuildError::Package(PackageError::MissingManifestField { ref field }) if field == "DEBIAN/control"
  ));
  assert_eq!(err.exit_code(), 7);
  assert!(!ws.output().exists() || fs::read_dir(ws.output()).unwrap().count() == 0);
}

#[tokio::test]
async fn missing_terminal_is_reported() {
  let ws = Workspace::new();
  let err = Builder::new(ws.config())
    .build(&BuildDescription::default(), None, &no_overrides(), &ws.output())
    .await
    .unwrap_err();
  assert!(matches!(err, BuildError::NoTerminal));
  assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
#[traced_test]
async fn dead_stages_are_diagnosed_not_built() {
  let ws = Workspace::new();
  let description = BuildDescription::parse(&format!(
    "{}\n[[stage]]\nname = \"docs\"\nbase = {{ stage = \"base\" }}\ncommands = [\"exit 1\"]\n",
    TOOLCHAIN
  ))
  .unwrap();
  let builder = Builder::new(ws.config());

  let outcome = builder
    .build(&description, None, &no_overrides(), &ws.output())
    .await
    .unwrap();

  assert_eq!(outcome.report.pruned, vec![StageId::from("docs")]);
  assert!(!builder.store().has(&StageId::from("docs")));
  assert!(logs_contain("stage is not needed by the terminal stage"));
}
