//! Types for stage execution.
//!
//! This module defines the error type, per-stage results, the run report and
//! the configuration shared by every stage of a run.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::consts::{DEFAULT_COMMAND_PATH, FETCH_MAX_RETRIES, FETCH_RETRY_DELAY_MS, SOURCE_DATE_EPOCH};
use crate::fetch::FetchError;
use crate::package::StagingManifest;
use crate::platform::paths;
use crate::stage::{ArgError, ResolvedArgs, StageId};
use crate::store::StoreError;
use crate::util::hash::ContentHash;
use crate::view::{FsView, ViewError};

/// Errors that can occur while executing a single stage.
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// A command exited unsuccessfully. `status` is `None` when it was killed by a signal.
  #[error("command #{index} of stage '{stage}' failed with {}: {command}", describe_status(.status))]
  StageCommand {
    stage: StageId,
    index: usize,
    command: String,
    status: Option<i32>,
  },

  #[error("stage '{stage}' did not produce declared output '{path}'")]
  MissingOutput { stage: StageId, path: String },

  #[error("unknown base image '{0}'")]
  UnknownImage(String),

  #[error("local source '{}' does not exist", .0.display())]
  LocalSourceMissing(PathBuf),

  /// A stage this one layers on has not completed in this run.
  #[error("stage '{0}' has not been built")]
  StageNotBuilt(StageId),

  #[error(transparent)]
  Args(#[from] ArgError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  View(#[from] ViewError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// The stage task ended without producing a result.
  #[error("stage task aborted: {0}")]
  Aborted(String),
}

fn describe_status(status: &Option<i32>) -> String {
  match status {
    Some(code) => format!("exit status {}", code),
    None => "a signal".to_string(),
  }
}

/// What a completed stage leaves behind for the rest of the run.
#[derive(Debug)]
pub struct StageResult {
  pub stage: StageId,

  /// On-disk root the stage's commands ran against.
  pub root: PathBuf,

  /// Final view of the root, kept only when another stage layers on this one.
  pub view: Option<Arc<FsView>>,

  /// Arguments as resolved for this invocation.
  pub args: ResolvedArgs,

  /// Environment after substitution, inherited by stages layered on this one.
  pub env: BTreeMap<String, String>,

  /// Published outputs with their content digests, in declaration order.
  pub outputs: Vec<(String, ContentHash)>,

  /// The staging manifest, when this stage was handed one to fill.
  pub manifest: Option<StagingManifest>,

  /// Combined command output.
  pub log: PathBuf,
}

/// Result of a successful run.
#[derive(Debug)]
pub struct RunReport {
  pub terminal: StageId,

  /// The stages that ran, grouped by dependency depth. A stage depends only
  /// on stages in earlier groups.
  pub waves: Vec<Vec<StageId>>,

  /// Declared stages outside the terminal's dependency closure. Never built.
  pub pruned: Vec<StageId>,

  pub stages: HashMap<StageId, Arc<StageResult>>,
}

impl RunReport {
  pub fn terminal_result(&self) -> Option<&StageResult> {
    self.stages.get(&self.terminal).map(Arc::as_ref)
  }

  /// Stages that ran, shallowest first.
  pub fn built(&self) -> Vec<StageId> {
    self.waves.iter().flatten().cloned().collect()
  }
}

/// Configuration shared by every stage of a run.
#[derive(Debug, Clone)]
pub struct BuildConfig {
  /// Maximum number of stages executing at once.
  pub parallelism: usize,

  /// Shell used for commands. `None` means `/bin/sh`.
  pub shell: Option<String>,

  /// Parent directory for per-run stage roots and logs.
  pub work_dir: PathBuf,

  /// Download cache for verified external dependencies.
  pub cache_dir: PathBuf,

  /// Root of the local build context that `local` copies read from.
  pub context_dir: PathBuf,

  /// Image id to a directory whose contents seed the root view.
  pub images: BTreeMap<String, PathBuf>,

  /// `PATH` handed to commands.
  pub command_path: String,

  pub fetch_retries: u32,
  pub fetch_retry_delay: Duration,

  /// Timestamp written into archives and exported as `SOURCE_DATE_EPOCH`.
  pub source_date_epoch: u64,

  /// Leave the run directory in place after the run.
  pub keep_work_dir: bool,
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      shell: None,
      work_dir: paths::work_dir(),
      cache_dir: paths::downloads_dir(),
      context_dir: PathBuf::from("."),
      images: BTreeMap::new(),
      command_path: DEFAULT_COMMAND_PATH.to_string(),
      fetch_retries: FETCH_MAX_RETRIES,
      fetch_retry_delay: Duration::from_millis(FETCH_RETRY_DELAY_MS),
      source_date_epoch: SOURCE_DATE_EPOCH,
      keep_work_dir: false,
    }
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
