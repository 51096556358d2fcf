//! Execution of a single stage.
//!
//! Every stage gets a private directory under the run directory:
//!
//! ```text
//! <run>/stages/<stage>/root   the stage's filesystem view, commands run here
//! <run>/stages/<stage>/tmp    TMPDIR for commands
//! <run>/logs/<stage>.log      combined command output
//! ```
//!
//! The root is seeded from the base (an image or a completed stage's view),
//! then copy-operations and fetches are applied in declared order, then the
//! commands run one by one. Declared outputs are captured and published to the
//! [`ArtifactStore`] only after every command has succeeded.

use std::collections::{BTreeMap, HashMap};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use super::cmd::{CommandContext, run_command};
use super::types::{BuildConfig, ExecuteError, StageResult};
use crate::consts::SCRATCH_IMAGE;
use crate::fetch::{ChecksumFetcher, FetchError};
use crate::package::StagingManifest;
use crate::stage::{Base, CopySource, ResolvedArgs, Stage, StageId, substitute};
use crate::store::ArtifactStore;
use crate::view::{FsView, ViewError, rel_path};

/// Runs stages against private filesystem views and publishes their outputs.
#[derive(Debug, Clone)]
pub struct StageExecutor {
  config: Arc<BuildConfig>,
  store: Arc<ArtifactStore>,
  fetcher: Arc<ChecksumFetcher>,
  run_dir: PathBuf,
  /// Manifest filled in while its owning stage executes.
  manifest: Option<(StageId, Arc<StagingManifest>)>,
}

impl StageExecutor {
  pub fn new(
    config: Arc<BuildConfig>,
    store: Arc<ArtifactStore>,
    run_dir: impl Into<PathBuf>,
  ) -> Result<Self, FetchError> {
    let fetcher =
      ChecksumFetcher::new(config.cache_dir.clone())?.with_retries(config.fetch_retries, config.fetch_retry_delay);
    Ok(Self {
      config,
      store,
      fetcher: Arc::new(fetcher),
      run_dir: run_dir.into(),
      manifest: None,
    })
  }

  pub fn with_fetcher(mut self, fetcher: ChecksumFetcher) -> Self {
    self.fetcher = Arc::new(fetcher);
    self
  }

  /// Hand `manifest` to `stage`. When that stage runs, the manifest's fields
  /// are resolved with the stage's arguments and every copy-operation is
  /// recorded into it as it executes. The result is `StageResult::manifest`.
  pub fn with_manifest(mut self, stage: StageId, manifest: StagingManifest) -> Self {
    self.manifest = Some((stage, Arc::new(manifest)));
    self
  }

  pub fn config(&self) -> &BuildConfig {
    &self.config
  }

  pub fn store(&self) -> &Arc<ArtifactStore> {
    &self.store
  }

  pub fn run_dir(&self) -> &Path {
    &self.run_dir
  }

  pub fn stage_root(&self, id: &StageId) -> PathBuf {
    self.run_dir.join("stages").join(&id.0).join("root")
  }

  pub fn log_path(&self, id: &StageId) -> PathBuf {
    self.run_dir.join("logs").join(format!("{}.log", id.0))
  }

  /// Execute `stage` with already-resolved arguments.
  ///
  /// `completed` holds the results of every stage built earlier in this run.
  /// When `retain_view` is set the final root is captured so other stages can
  /// layer on it.
  pub async fn execute(
    &self,
    stage: &Stage,
    args: ResolvedArgs,
    completed: &HashMap<StageId, Arc<StageResult>>,
    retain_view: bool,
  ) -> Result<StageResult, ExecuteError> {
    let id = &stage.name;
    let stage_dir = self.run_dir.join("stages").join(&id.0);
    let root = stage_dir.join("root");
    let scratch = stage_dir.join("tmp");
    let log = self.log_path(id);

    info!(stage = %id, commands = stage.commands.len(), "executing stage");

    if tokio::fs::try_exists(&stage_dir).await? {
      tokio::fs::remove_dir_all(&stage_dir).await?;
    }
    tokio::fs::create_dir_all(&root).await?;

    let mut env = self.seed_base(stage, &args, completed, &root).await?;
    for (key, value) in &stage.env {
      env.insert(key.clone(), substitute(value, &args));
    }

    let mut manifest = self
      .manifest
      .as_ref()
      .filter(|(owner, _)| owner == id)
      .map(|(_, manifest)| manifest.substituted(&args));
    self.apply_copies(stage, &args, &root, manifest.as_mut()).await?;
    self.apply_fetches(stage, &args, &root).await?;

    let mut command_env: BTreeMap<String, String> =
      args.iter().map(|(name, value)| (name.clone(), value.clone())).collect();
    command_env.extend(env.clone());
    command_env
      .entry("PATH".to_string())
      .or_insert_with(|| self.config.command_path.clone());
    command_env.insert(
      "SOURCE_DATE_EPOCH".to_string(),
      self.config.source_date_epoch.to_string(),
    );
    command_env.insert("KILN_ROOT".to_string(), root.display().to_string());
    command_env.insert("KILN_STAGE".to_string(), id.0.clone());

    let cwd = match &stage.workdir {
      Some(dir) => root.join(rel_path(&substitute(dir, &args))?),
      None => root.clone(),
    };
    tokio::fs::create_dir_all(&cwd).await?;

    let ctx = CommandContext {
      cwd: &cwd,
      scratch: &scratch,
      env: &command_env,
      shell: self.config.shell.as_deref(),
      log: &log,
    };
    for (index, command) in stage.commands.iter().enumerate() {
      let command = substitute(command, &args);
      let status = run_command(&command, &ctx).await?;
      if !status.success() {
        return Err(ExecuteError::StageCommand {
          stage: id.clone(),
          index,
          command,
          status: status.code(),
        });
      }
    }

    let mut captured = Vec::with_capacity(stage.outputs.len());
    for output in &stage.outputs {
      let path = substitute(output, &args);
      let source = root.join(rel_path(&path)?);
      let view = match blocking(move || FsView::capture(&source)).await {
        Err(ExecuteError::View(ViewError::NotFound(_))) => {
          return Err(ExecuteError::MissingOutput { stage: id.clone(), path });
        }
        other => other?,
      };
      captured.push((path, view));
    }
    let names: Vec<String> = captured.iter().map(|(path, _)| path.clone()).collect();
    let artifacts = self.store.put(id, captured)?;
    let outputs: Vec<_> = names
      .into_iter()
      .zip(artifacts.iter().map(|artifact| artifact.digest().clone()))
      .collect();

    let view = if retain_view {
      let final_root = root.clone();
      Some(Arc::new(blocking(move || FsView::capture(&final_root)).await?))
    } else {
      None
    };

    info!(stage = %id, outputs = outputs.len(), "stage complete");

    Ok(StageResult {
      stage: id.clone(),
      root,
      view,
      args,
      env,
      outputs,
      manifest,
      log,
    })
  }

  /// Materialize the base into `root` and return the inherited environment.
  async fn seed_base(
    &self,
    stage: &Stage,
    args: &ResolvedArgs,
    completed: &HashMap<StageId, Arc<StageResult>>,
    root: &Path,
  ) -> Result<BTreeMap<String, String>, ExecuteError> {
    match &stage.base {
      Base::Image(image) => {
        let image = substitute(image, args);
        if image == SCRATCH_IMAGE {
          return Ok(BTreeMap::new());
        }
        let dir = self
          .config
          .images
          .get(&image)
          .cloned()
          .ok_or(ExecuteError::UnknownImage(image))?;
        debug!(stage = %stage.name, image = %dir.display(), "seeding root from image");
        let dest = root.to_path_buf();
        blocking(move || FsView::capture(&dir)?.materialize(&dest)).await?;
        Ok(BTreeMap::new())
      }
      Base::Stage(base) => {
        let upstream = completed
          .get(base)
          .ok_or_else(|| ExecuteError::StageNotBuilt(base.clone()))?;
        let view = upstream
          .view
          .clone()
          .ok_or_else(|| ExecuteError::StageNotBuilt(base.clone()))?;
        debug!(stage = %stage.name, base = %base, entries = view.len(), "seeding root from stage");
        let dest = root.to_path_buf();
        blocking(move || view.materialize(&dest)).await?;
        Ok(upstream.env.clone())
      }
    }
  }

  /// Apply copy-operations in declared order, recording each destination in `manifest`.
  async fn apply_copies(
    &self,
    stage: &Stage,
    args: &ResolvedArgs,
    root: &Path,
    mut manifest: Option<&mut StagingManifest>,
  ) -> Result<(), ExecuteError> {

    for op in &stage.copy {
      let src = substitute(&op.src, args);
      let dst = substitute(&op.dst, args);

      let view = match &op.from {
        CopySource::Local => {
          let path = self.config.context_dir.join(rel_path(&src)?);
          if tokio::fs::symlink_metadata(&path).await.is_err() {
            return Err(ExecuteError::LocalSourceMissing(path));
          }
          blocking(move || FsView::capture(&path)).await?
        }
        CopySource::Stage(from) => self.store.get(from, &src)?.view().clone(),
      };

      let target = copy_target(root, &src, &dst, view.root_is_file())?;
      debug!(stage = %stage.name, src = %src, dst = %dst, entries = view.len(), "copying");
      blocking(move || view.materialize(&target)).await?;
      if let Some(manifest) = manifest.as_mut() {
        manifest.record(dst);
      }
    }

    Ok(())
  }

  async fn apply_fetches(&self, stage: &Stage, args: &ResolvedArgs, root: &Path) -> Result<(), ExecuteError> {
    for dep in &stage.fetch {
      let url = substitute(&dep.url, args);
      let digest = substitute(&dep.sha256, args);
      let dest = substitute(&dep.dest, args);

      let cached = self.fetcher.fetch(&url, &digest).await?;

      let mut target = root.join(rel_path(&dest)?);
      if dest.ends_with('/') || tokio::fs::metadata(&target).await.is_ok_and(|m| m.is_dir()) {
        target.push(url_file_name(&url));
      }
      if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
      }
      tokio::fs::copy(&cached, &target).await?;
      tokio::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o644)).await?;
      debug!(stage = %stage.name, url = %url, dest = %target.display(), "fetched dependency placed");
    }
    Ok(())
  }
}

/// Where a copy lands. A single file copied onto a directory (or a `dst`
/// ending in `/`) keeps its own name; trees are merged into `dst`.
fn copy_target(root: &Path, src: &str, dst: &str, is_file: bool) -> Result<PathBuf, ExecuteError> {
  let target = root.join(rel_path(dst)?);
  if is_file
    && (dst.ends_with('/') || target.is_dir())
    && let Some(name) = Path::new(src).file_name()
  {
    return Ok(target.join(name));
  }
  Ok(target)
}

/// Last path segment of a URL, without query or fragment.
fn url_file_name(url: &str) -> String {
  url
    .split(['?', '#'])
    .next()
    .and_then(|path| path.rsplit('/').next())
    .filter(|name| !name.is_empty())
    .unwrap_or("download")
    .to_string()
}

/// Run filesystem work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, ExecuteError>
where
  F: FnOnce() -> Result<T, ViewError> + Send + 'static,
  T: Send + 'static,
{
  tokio::task::spawn_blocking(f)
    .await
    .map_err(|e| ExecuteError::Aborted(e.to_string()))?
    .map_err(ExecuteError::from)
}
