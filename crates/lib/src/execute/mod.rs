//! Stage execution.
//!
//! This module drives a [`BuildGraph`] to completion for one terminal stage:
//! - Only the terminal's dependency closure is built; other stages are pruned
//! - A stage starts as soon as every stage it layers on or copies from has
//!   completed, with at most `parallelism` stages running at once
//! - After the first failure no further stage starts; stages already running
//!   finish, and the first failure is returned

pub mod cmd;
mod stage;
pub mod types;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::build::BuildError;
use crate::graph::BuildGraph;
use crate::stage::{Stage, StageId, resolve_args, unused_overrides};

pub use stage::StageExecutor;
pub use types::{BuildConfig, ExecuteError, RunReport, StageResult};

type Completed = HashMap<StageId, Arc<StageResult>>;

/// What a stage task reports back. `Ok(None)` means the stage never started
/// because another stage had already failed.
type TaskOutcome = (StageId, Result<Option<StageResult>, ExecuteError>);

/// State shared by the stage tasks of one run.
#[derive(Clone)]
struct Shared {
  semaphore: Arc<Semaphore>,
  failed: Arc<AtomicBool>,
  overrides: Arc<BTreeMap<String, String>>,
}

impl BuildGraph {
  /// Build `terminal` and everything it depends on.
  ///
  /// Structural problems (unknown terminal, cycles) are reported before any
  /// stage runs. When a stage fails, stages already running finish, no
  /// further stage starts, and the first failure is returned. Artifacts of
  /// stages that completed stay in the executor's store.
  pub async fn run(
    &self,
    terminal: &StageId,
    overrides: &BTreeMap<String, String>,
    executor: &StageExecutor,
  ) -> Result<RunReport, BuildError> {
    let waves = self.waves(terminal)?;
    let pruned = self.unreachable_from(terminal)?;

    for id in &pruned {
      warn!(stage = %id, terminal = %terminal, "stage is not needed by the terminal stage, skipping");
    }
    let needed = waves.iter().flatten().filter_map(|id| self.stage(id));
    for name in unused_overrides(needed, overrides) {
      warn!(arg = %name, "build argument override is not declared by any stage being built");
    }

    info!(
      terminal = %terminal,
      stages = waves.iter().map(Vec::len).sum::<usize>(),
      depth = waves.len(),
      "starting run"
    );

    // unfinished dependencies per stage; every dependency is inside the closure
    let mut blocked: HashMap<StageId, usize> = waves
      .iter()
      .flatten()
      .map(|id| {
        let deps: HashSet<StageId> = self.dependencies(id).into_iter().collect();
        (id.clone(), deps.len())
      })
      .collect();
    let mut ready: VecDeque<StageId> = waves.iter().flatten().filter(|id| blocked[*id] == 0).cloned().collect();

    let shared = Shared {
      semaphore: Arc::new(Semaphore::new(executor.config().parallelism.max(1))),
      failed: Arc::new(AtomicBool::new(false)),
      overrides: Arc::new(overrides.clone()),
    };
    let mut join_set: JoinSet<TaskOutcome> = JoinSet::new();
    let mut running: HashSet<StageId> = HashSet::new();
    let mut completed: Completed = HashMap::new();
    let mut failure: Option<(StageId, ExecuteError)> = None;

    loop {
      if !shared.failed.load(Ordering::SeqCst) {
        let snapshot = Arc::new(completed.clone());
        while let Some(id) = ready.pop_front() {
          if let Some(stage) = self.stage(&id) {
            debug!(stage = %id, "stage ready");
            self.spawn_stage(&mut join_set, stage.clone(), &snapshot, executor, &shared);
            running.insert(id);
          }
        }
      }

      let Some(joined) = join_set.join_next().await else {
        break;
      };
      match joined {
        Ok((id, Ok(Some(result)))) => {
          running.remove(&id);
          info!(stage = %id, "stage succeeded");
          for dependent in self.dependents(&id) {
            if let Some(count) = blocked.get_mut(&dependent) {
              *count -= 1;
              if *count == 0 {
                ready.push_back(dependent);
              }
            }
          }
          completed.insert(id, Arc::new(result));
        }
        Ok((id, Ok(None))) => {
          running.remove(&id);
          debug!(stage = %id, "stage not started after an earlier failure");
        }
        Ok((id, Err(e))) => {
          running.remove(&id);
          error!(stage = %id, error = %e, "stage failed");
          shared.failed.store(true, Ordering::SeqCst);
          if failure.is_none() {
            failure = Some((id, e));
          }
        }
        Err(e) => {
          error!(error = %e, "stage task panicked");
          shared.failed.store(true, Ordering::SeqCst);
        }
      }
    }

    if let Some((stage, error)) = failure {
      return Err(BuildError::Stage { stage, error });
    }
    // a task that never reported back panicked
    let mut lost: Vec<StageId> = running.into_iter().collect();
    lost.sort();
    if let Some(stage) = lost.into_iter().next() {
      return Err(BuildError::Stage {
        stage,
        error: ExecuteError::Aborted("stage task panicked".to_string()),
      });
    }

    info!(terminal = %terminal, built = completed.len(), "run complete");

    Ok(RunReport {
      terminal: terminal.clone(),
      waves,
      pruned,
      stages: completed,
    })
  }

  /// Start one stage whose dependencies have all completed.
  ///
  /// The task checks the shared failure flag once it holds a worker permit,
  /// so a stage still queued for a permit when another stage fails never runs.
  /// A failing stage raises the flag before giving its permit back.
  fn spawn_stage(
    &self,
    join_set: &mut JoinSet<TaskOutcome>,
    stage: Stage,
    completed: &Arc<Completed>,
    executor: &StageExecutor,
    shared: &Shared,
  ) {
    let retain_view = self.has_layered_dependents(&stage.name);
    let completed = completed.clone();
    let executor = executor.clone();
    let shared = shared.clone();

    join_set.spawn(async move {
      let result = async {
        let _permit = shared
          .semaphore
          .clone()
          .acquire_owned()
          .await
          .map_err(|e| ExecuteError::Aborted(e.to_string()))?;
        if shared.failed.load(Ordering::SeqCst) {
          return Ok(None);
        }

        let outcome = async {
          let inherited = stage.base_stage().and_then(|base| completed.get(base)).map(|r| &r.args);
          let args = resolve_args(&stage, &shared.overrides, inherited)?;
          executor.execute(&stage, args, &completed, retain_view).await
        }
        .await;
        if outcome.is_err() {
          shared.failed.store(true, Ordering::SeqCst);
        }
        outcome.map(Some)
      }
      .await;
      (stage.name, result)
    });
  }

  /// Whether some stage uses `id` as its base, so its final view must be kept.
  fn has_layered_dependents(&self, id: &StageId) -> bool {
    self
      .dependents(id)
      .iter()
      .filter_map(|dependent| self.stage(dependent))
      .any(|stage: &Stage| stage.base_stage() == Some(id))
  }
}
