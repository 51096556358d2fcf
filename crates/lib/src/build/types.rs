use std::path::PathBuf;

use thiserror::Error;

use crate::description::DescriptionError;
use crate::execute::{ExecuteError, RunReport};
use crate::fetch::FetchError;
use crate::graph::GraphError;
use crate::package::{PackageError, StagingManifest};
use crate::stage::StageId;

/// The single first fatal cause of a failed build.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("stage '{stage}' failed: {error}")]
  Stage { stage: StageId, error: ExecuteError },

  #[error(transparent)]
  Package(#[from] PackageError),

  #[error(transparent)]
  Description(#[from] DescriptionError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error("no terminal stage given and the description declares none")]
  NoTerminal,

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl BuildError {
  /// Process exit code distinguishing the failure classes callers script against.
  ///
  /// | code | failure |
  /// |------|---------|
  /// | 3 | dependency cycle |
  /// | 4 | unknown base or copy source |
  /// | 5 | stage command exited unsuccessfully |
  /// | 6 | fetched blob failed digest verification |
  /// | 7 | missing manifest field |
  /// | 1 | anything else |
  pub fn exit_code(&self) -> u8 {
    match self {
      BuildError::Graph(e) | BuildError::Description(DescriptionError::Graph(e)) => graph_exit_code(e),
      BuildError::Stage { error, .. } => match error {
        ExecuteError::StageCommand { .. } => 5,
        ExecuteError::Fetch(FetchError::DigestMismatch { .. }) => 6,
        _ => 1,
      },
      BuildError::Package(PackageError::MissingManifestField { .. }) => 7,
      _ => 1,
    }
  }

  /// The stage that failed, for execution errors.
  pub fn failed_stage(&self) -> Option<&StageId> {
    match self {
      BuildError::Stage { stage, .. } => Some(stage),
      _ => None,
    }
  }
}

fn graph_exit_code(error: &GraphError) -> u8 {
  match error {
    GraphError::CycleDetected { .. } => 3,
    GraphError::UnknownBase { .. } => 4,
    _ => 1,
  }
}

/// What a successful build produced.
#[derive(Debug)]
pub struct BuildOutcome {
  pub archive: PathBuf,
  pub report: RunReport,
  /// The manifest as packaged, including what the terminal stage copied in.
  pub manifest: StagingManifest,
  /// Set when the run directory was kept.
  pub run_dir: Option<PathBuf>,
}
