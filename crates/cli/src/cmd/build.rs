//! Implementation of the `kiln build` command.
//!
//! Loads a stage description, builds the terminal stage's dependency closure
//! and writes the resulting package to the output directory.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::debug;

use kiln_lib::{BuildConfig, BuildOutcome, Builder};

use super::{default_context, load_description, parse_key_value, resolve_terminal};
use crate::output::{Facts, OutputFormat, Status, elapsed, human_size, print_json, status};

#[derive(Args, Debug)]
pub struct BuildArgs {
  /// Stage description file
  #[arg(default_value = "kiln.toml")]
  pub file: PathBuf,

  /// Terminal stage to build (default: `[package].stage`, else the last stage)
  #[arg(short, long)]
  pub target: Option<String>,

  /// Override a build argument
  #[arg(long = "build-arg", value_name = "NAME=VALUE", value_parser = parse_key_value)]
  pub build_args: Vec<(String, String)>,

  /// Directory the package is written to
  #[arg(long, default_value = "dist")]
  pub output: PathBuf,

  /// Maximum number of stages running at once (default: available CPUs)
  #[arg(short, long)]
  pub jobs: Option<usize>,

  /// Shell used to run stage commands (default: /bin/sh)
  #[arg(long)]
  pub shell: Option<String>,

  /// Map a base image id to a local directory
  #[arg(long = "image", value_name = "ID=DIR", value_parser = parse_key_value)]
  pub images: Vec<(String, String)>,

  /// Directory `local` copies read from (default: the description's directory)
  #[arg(long)]
  pub context: Option<PathBuf>,

  /// Keep stage roots and logs after a successful build
  #[arg(long)]
  pub keep_work: bool,

  /// Retries for transient download failures
  #[arg(long)]
  pub fetch_retries: Option<u32>,

  /// Base delay between download retries (e.g., "500ms", "2s")
  #[arg(long, value_parser = humantime::parse_duration)]
  pub fetch_retry_delay: Option<Duration>,

  /// Output format
  #[arg(long, value_enum, default_value = "text")]
  pub format: OutputFormat,
}

impl BuildArgs {
  fn config(&self) -> BuildConfig {
    let mut config = BuildConfig {
      context_dir: self.context.clone().unwrap_or_else(|| default_context(&self.file)),
      shell: self.shell.clone(),
      images: self
        .images
        .iter()
        .map(|(id, dir)| (id.clone(), PathBuf::from(dir)))
        .collect(),
      keep_work_dir: self.keep_work,
      ..Default::default()
    };
    if let Some(jobs) = self.jobs {
      config.parallelism = jobs.max(1);
    }
    if let Some(retries) = self.fetch_retries {
      config.fetch_retries = retries;
    }
    if let Some(delay) = self.fetch_retry_delay {
      config.fetch_retry_delay = delay;
    }
    config
  }
}

#[derive(Debug, Serialize)]
struct BuildSummary {
  archive: String,
  bytes: u64,
  terminal: String,
  waves: Vec<Vec<String>>,
  pruned: Vec<String>,
  outputs: Vec<OutputSummary>,
  /// Where the terminal stage's copy-operations landed.
  contents: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  run_dir: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputSummary {
  stage: String,
  path: String,
  digest: String,
}

impl BuildSummary {
  fn new(outcome: &BuildOutcome, bytes: u64) -> Self {
    let report = &outcome.report;
    let outputs = report
      .built()
      .iter()
      .filter_map(|id| report.stages.get(id))
      .flat_map(|result| {
        result.outputs.iter().map(|(path, digest)| OutputSummary {
          stage: result.stage.to_string(),
          path: path.clone(),
          digest: digest.to_string(),
        })
      })
      .collect();

    Self {
      archive: outcome.archive.display().to_string(),
      bytes,
      terminal: report.terminal.to_string(),
      waves: report
        .waves
        .iter()
        .map(|wave| wave.iter().map(ToString::to_string).collect())
        .collect(),
      pruned: report.pruned.iter().map(ToString::to_string).collect(),
      outputs,
      contents: outcome.manifest.contents.clone(),
      run_dir: outcome.run_dir.as_ref().map(|dir| dir.display().to_string()),
    }
  }
}

pub fn cmd_build(args: BuildArgs) -> Result<()> {
  let start = Instant::now();

  let description = load_description(&args.file)?;
  let terminal = resolve_terminal(&description, args.target.as_deref())?;
  let overrides: BTreeMap<String, String> = args.build_args.iter().cloned().collect();
  let config = args.config();
  debug!(?config, "build configuration");

  let builder = Builder::new(config);
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt.block_on(builder.build(&description, Some(&terminal), &overrides, &args.output))?;

  let bytes = std::fs::metadata(&outcome.archive)
    .with_context(|| format!("Failed to stat archive: {}", outcome.archive.display()))?
    .len();
  let summary = BuildSummary::new(&outcome, bytes);

  if args.format.is_json() {
    print_json(&summary)?;
  } else {
    status(Status::Done, &format!("Built {}", summary.archive));
    Facts::new()
      .row("Terminal", summary.terminal.as_str())
      .row("Stages built", outcome.report.built().len().to_string())
      .row_opt("Pruned", (!summary.pruned.is_empty()).then(|| summary.pruned.join(", ")))
      .row("Size", human_size(bytes))
      .row("Duration", elapsed(start.elapsed()))
      .row_opt("Run directory", summary.run_dir.as_deref())
      .print();
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser)]
  struct Harness {
    #[command(flatten)]
    args: BuildArgs,
  }

  fn parse(argv: &[&str]) -> BuildArgs {
    Harness::try_parse_from(std::iter::once("kiln").chain(argv.iter().copied()))
      .unwrap()
      .args
  }

  #[test]
  fn flags_map_onto_config() {
    let args = parse(&[
      "pkg/kiln.toml",
      "--jobs",
      "3",
      "--image",
      "debian=/srv/rootfs",
      "--fetch-retries",
      "5",
      "--fetch-retry-delay",
      "250ms",
      "--keep-work",
    ]);
    let config = args.config();

    assert_eq!(config.parallelism, 3);
    assert_eq!(config.images["debian"], PathBuf::from("/srv/rootfs"));
    assert_eq!(config.fetch_retries, 5);
    assert_eq!(config.fetch_retry_delay, Duration::from_millis(250));
    assert_eq!(config.context_dir, PathBuf::from("pkg"));
    assert!(config.keep_work_dir);
  }

  #[test]
  fn build_args_are_repeatable() {
    let args = parse(&["--build-arg", "VERSION=2.0", "--build-arg", "TARGET=aarch64"]);
    assert_eq!(args.build_args, vec![
      ("VERSION".to_string(), "2.0".to_string()),
      ("TARGET".to_string(), "aarch64".to_string()),
    ]);
    assert_eq!(args.file, PathBuf::from("kiln.toml"));
  }

  #[test]
  fn malformed_build_arg_is_rejected() {
    let result = Harness::try_parse_from(["kiln", "--build-arg", "VERSION"]);
    assert!(result.is_err());
  }
}
