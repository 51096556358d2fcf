//! The build invocation surface.
//!
//! [`Builder::build`] ties the pieces together for one invocation: it runs the
//! terminal stage's dependency closure through the [`BuildGraph`], then hands
//! the terminal stage's installed-file tree to the [`Packager`].
//!
//! Each invocation gets a fresh run directory under the configured work
//! directory. It is removed after a successful build unless asked to keep it,
//! and always kept after a failure so stage roots and logs can be inspected.

mod types;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

pub use types::{BuildError, BuildOutcome};

use crate::description::BuildDescription;
use crate::execute::{BuildConfig, ExecuteError, RunReport, StageExecutor};
use crate::fetch::ChecksumFetcher;
use crate::package::{Packager, StagingManifest};
use crate::stage::StageId;
use crate::store::ArtifactStore;

pub struct Builder {
  config: Arc<BuildConfig>,
  store: Arc<ArtifactStore>,
  fetcher: Option<ChecksumFetcher>,
}

impl Builder {
  pub fn new(config: BuildConfig) -> Self {
    Self {
      config: Arc::new(config),
      store: Arc::new(ArtifactStore::new()),
      fetcher: None,
    }
  }

  /// Use a preconfigured fetcher instead of one derived from the config.
  pub fn with_fetcher(mut self, fetcher: ChecksumFetcher) -> Self {
    self.fetcher = Some(fetcher);
    self
  }

  pub fn config(&self) -> &BuildConfig {
    &self.config
  }

  /// Artifacts of every stage that completed, including after a failed build.
  pub fn store(&self) -> &Arc<ArtifactStore> {
    &self.store
  }

  /// Build `terminal` (or the description's default terminal) and package it into `output_dir`.
  pub async fn build(
    &self,
    description: &BuildDescription,
    terminal: Option<&StageId>,
    overrides: &BTreeMap<String, String>,
    output_dir: &Path,
  ) -> Result<BuildOutcome, BuildError> {
    let terminal = terminal
      .cloned()
      .or_else(|| description.default_terminal())
      .ok_or(BuildError::NoTerminal)?;

    // structural errors surface before anything touches the disk
    description.graph.waves(&terminal)?;

    tokio::fs::create_dir_all(&self.config.work_dir).await?;
    let run_dir = tempfile::Builder::new()
      .prefix("run-")
      .keep(true)
      .tempdir_in(&self.config.work_dir)?
      .path()
      .to_path_buf();
    debug!(run_dir = %run_dir.display(), "run directory created");

    let mut executor = StageExecutor::new(self.config.clone(), self.store.clone(), &run_dir)?
      .with_manifest(terminal.clone(), description.manifest());
    if let Some(fetcher) = &self.fetcher {
      executor = executor.with_fetcher(fetcher.clone());
    }

    match self
      .run_and_package(description, &terminal, overrides, output_dir, &executor)
      .await
    {
      Ok((archive, report, manifest)) => {
        let run_dir = if self.config.keep_work_dir {
          Some(run_dir)
        } else {
          tokio::fs::remove_dir_all(&run_dir).await?;
          None
        };
        info!(terminal = %terminal, archive = %archive.display(), "build complete");
        Ok(BuildOutcome {
          archive,
          report,
          manifest,
          run_dir,
        })
      }
      Err(e) => {
        warn!(run_dir = %run_dir.display(), "build failed, run directory kept for inspection");
        Err(e)
      }
    }
  }

  async fn run_and_package(
    &self,
    description: &BuildDescription,
    terminal: &StageId,
    overrides: &BTreeMap<String, String>,
    output_dir: &Path,
    executor: &StageExecutor,
  ) -> Result<(PathBuf, RunReport, StagingManifest), BuildError> {
    let report = description.graph.run(terminal, overrides, executor).await?;
    let result = report.terminal_result().ok_or_else(|| BuildError::Stage {
      stage: terminal.clone(),
      error: ExecuteError::StageNotBuilt(terminal.clone()),
    })?;

    // filled in by the terminal stage as its copies ran
    let manifest = result
      .manifest
      .clone()
      .unwrap_or_else(|| description.manifest().substituted(&result.args));
    let staging_root = manifest.staging_root(&result.root)?;
    debug!(staging_root = %staging_root.display(), copies = manifest.contents.len(), "packaging");

    let packager = Packager::new(output_dir).with_source_date_epoch(self.config.source_date_epoch);
    let packaged = manifest.clone();
    let archive = tokio::task::spawn_blocking(move || packager.assemble(&staging_root, &packaged))
      .await
      .map_err(std::io::Error::other)??;

    Ok((archive, report, manifest))
  }
}
