//! The per-run artifact store.
//!
//! Each stage owns one slot keyed by its id. A finished stage hands over all
//! of its declared outputs in a single `put`, which creates the slot already
//! sealed. A slot is written exactly once per run and never changes again, so
//! readers in later stages observe a fixed set of artifacts.
//!
//! Artifact contents are held once per distinct digest and shared behind
//! `Arc`, so two stages publishing identical trees cost one copy.
//!
//! ```text
//! slots:  stage id -> { output path -> digest }
//! blobs:  digest   -> FsView
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::debug;

use crate::stage::StageId;
use crate::util::hash::ContentHash;
use crate::view::{FsView, rel_path};

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("stage '{stage}' has no artifact at '{path}'")]
  ArtifactNotFound { stage: StageId, path: String },

  /// `path` is `/` when the stage had already been stored.
  #[error("stage '{stage}' already published '{path}'")]
  DuplicateArtifact { stage: StageId, path: String },
}

/// A published file tree and its content digest.
#[derive(Debug, Clone)]
pub struct Artifact {
  digest: ContentHash,
  view: Arc<FsView>,
}

impl Artifact {
  pub fn new(view: FsView) -> Self {
    Self {
      digest: view.digest(),
      view: Arc::new(view),
    }
  }

  pub fn digest(&self) -> &ContentHash {
    &self.digest
  }

  pub fn view(&self) -> &FsView {
    &self.view
  }
}

#[derive(Debug, Default)]
struct Slot {
  outputs: BTreeMap<PathBuf, ContentHash>,
}

#[derive(Debug, Default)]
struct Inner {
  slots: HashMap<StageId, Slot>,
  blobs: HashMap<ContentHash, Arc<FsView>>,
}

#[derive(Debug, Default)]
pub struct ArtifactStore {
  inner: RwLock<Inner>,
}

impl ArtifactStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn read(&self) -> RwLockReadGuard<'_, Inner> {
    self.inner.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn write(&self) -> RwLockWriteGuard<'_, Inner> {
    self.inner.write().unwrap_or_else(PoisonError::into_inner)
  }

  /// Publish every output of `stage` and seal its slot in one step.
  ///
  /// The slot goes from absent to sealed atomically: a second `put` for the
  /// same stage fails with `DuplicateArtifact`, and no reader ever sees a
  /// half-filled slot. Nothing is stored when the call fails.
  pub fn put(&self, stage: &StageId, outputs: Vec<(String, FsView)>) -> Result<Vec<Artifact>, StoreError> {
    let mut keys = BTreeSet::new();
    let mut keyed = Vec::with_capacity(outputs.len());
    for (path, view) in outputs {
      let key = rel_path(&path).map_err(|_| StoreError::ArtifactNotFound {
        stage: stage.clone(),
        path: path.clone(),
      })?;
      if !keys.insert(key.clone()) {
        return Err(StoreError::DuplicateArtifact {
          stage: stage.clone(),
          path,
        });
      }
      keyed.push((key, Artifact::new(view)));
    }

    let mut inner = self.write();
    if inner.slots.contains_key(stage) {
      return Err(StoreError::DuplicateArtifact {
        stage: stage.clone(),
        path: "/".to_string(),
      });
    }

    let mut slot = Slot::default();
    let mut published = Vec::with_capacity(keyed.len());
    for (key, artifact) in keyed {
      slot.outputs.insert(key, artifact.digest.clone());
      let shared = inner
        .blobs
        .entry(artifact.digest.clone())
        .or_insert_with(|| artifact.view.clone())
        .clone();
      published.push(Artifact {
        digest: artifact.digest,
        view: shared,
      });
    }
    inner.slots.insert(stage.clone(), slot);

    debug!(stage = %stage, count = published.len(), "stage artifacts sealed");
    Ok(published)
  }

  /// Look up `path` among the outputs of completed `stage`.
  ///
  /// `path` may name a published output exactly or any entry inside one.
  pub fn get(&self, stage: &StageId, path: &str) -> Result<Artifact, StoreError> {
    let not_found = || StoreError::ArtifactNotFound {
      stage: stage.clone(),
      path: path.to_string(),
    };
    let key = rel_path(path).map_err(|_| not_found())?;

    let inner = self.read();
    let slot = inner.slots.get(stage).ok_or_else(not_found)?;

    if let Some(digest) = slot.outputs.get(&key) {
      let view = inner.blobs.get(digest).ok_or_else(not_found)?;
      return Ok(Artifact {
        digest: digest.clone(),
        view: view.clone(),
      });
    }

    // deepest published output that contains the requested path
    let (output, digest) = slot
      .outputs
      .iter()
      .filter(|(output, _)| key.starts_with(output))
      .max_by_key(|(output, _)| output.components().count())
      .ok_or_else(not_found)?;
    let inside = key.strip_prefix(output).unwrap_or(Path::new(""));
    let sub = inner
      .blobs
      .get(digest)
      .and_then(|view| view.subtree(inside))
      .ok_or_else(not_found)?;

    Ok(Artifact::new(sub))
  }

  /// Whether `stage` has completed and stored its outputs.
  pub fn has(&self, stage: &StageId) -> bool {
    self.read().slots.contains_key(stage)
  }

  /// Published output paths of `stage`, in path order.
  pub fn outputs(&self, stage: &StageId) -> Vec<PathBuf> {
    self
      .read()
      .slots
      .get(stage)
      .map(|slot| slot.outputs.keys().cloned().collect())
      .unwrap_or_default()
  }

  /// Completed stages, sorted by id.
  pub fn completed(&self) -> Vec<StageId> {
    let mut stages: Vec<StageId> = self.read().slots.keys().cloned().collect();
    stages.sort();
    stages
  }

  /// Number of distinct artifact contents held.
  pub fn blob_count(&self) -> usize {
    self.read().blobs.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tree(files: &[(&str, &str)]) -> FsView {
    let mut view = FsView::empty_dir();
    for (path, content) in files {
      view.insert_file(path, content.as_bytes(), false).unwrap();
    }
    view
  }

  fn id(name: &str) -> StageId {
    StageId::from(name)
  }

  fn out(path: &str, view: FsView) -> Vec<(String, FsView)> {
    vec![(path.to_string(), view)]
  }

  #[test]
  fn get_returns_published_view() {
    let store = ArtifactStore::new();
    let view = tree(&[("bin/cc", "compiler")]);
    let published = store.put(&id("c-tools"), out("/out", view.clone())).unwrap();

    let artifact = store.get(&id("c-tools"), "/out").unwrap();
    assert_eq!(artifact.view(), &view);
    assert_eq!(artifact.digest(), published[0].digest());
    assert!(store.has(&id("c-tools")));
  }

  #[test]
  fn unknown_stage_or_undeclared_path_is_not_found() {
    let store = ArtifactStore::new();
    store.put(&id("a"), out("/out", tree(&[("f", "x")]))).unwrap();

    assert!(matches!(
      store.get(&id("a"), "/elsewhere"),
      Err(StoreError::ArtifactNotFound { .. })
    ));
    assert!(matches!(
      store.get(&id("missing"), "/out"),
      Err(StoreError::ArtifactNotFound { .. })
    ));
    assert!(!store.has(&id("missing")));
  }

  #[test]
  fn path_inside_output_returns_subtree() {
    let store = ArtifactStore::new();
    store
      .put(&id("a"), out("/out", tree(&[("bin/cc", "cc"), ("lib/libc.a", "libc")])))
      .unwrap();

    let bin = store.get(&id("a"), "/out/bin").unwrap();
    assert!(bin.view().get(Path::new("cc")).is_some());
    assert!(bin.view().get(Path::new("libc.a")).is_none());

    let file = store.get(&id("a"), "out/lib/libc.a").unwrap();
    assert!(file.view().root_is_file());
  }

  #[test]
  fn second_put_for_same_stage_is_duplicate() {
    let store = ArtifactStore::new();
    store.put(&id("a"), out("/out", tree(&[("f", "1")]))).unwrap();

    let err = store.put(&id("a"), out("/other", tree(&[("g", "2")]))).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateArtifact { ref path, .. } if path == "/"));
    assert!(matches!(
      store.put(&id("a"), Vec::new()),
      Err(StoreError::DuplicateArtifact { .. })
    ));

    // the first put is untouched
    assert_eq!(store.outputs(&id("a")), vec![PathBuf::from("out")]);
    assert!(store.get(&id("a"), "/other").is_err());
    assert_eq!(store.blob_count(), 1);
  }

  #[test]
  fn put_with_several_outputs() {
    let store = ArtifactStore::new();
    let artifacts = store
      .put(
        &id("a"),
        vec![
          ("/out/bin".to_string(), tree(&[("cc", "cc")])),
          ("/out/lib".to_string(), tree(&[("libc.a", "libc")])),
        ],
      )
      .unwrap();
    assert_eq!(artifacts.len(), 2);
    assert!(store.get(&id("a"), "/out/lib/libc.a").is_ok());
  }

  #[test]
  fn stage_without_outputs_is_still_complete() {
    let store = ArtifactStore::new();
    assert!(store.put(&id("lint"), Vec::new()).unwrap().is_empty());
    assert!(store.has(&id("lint")));
    assert!(store.outputs(&id("lint")).is_empty());
  }

  #[test]
  fn repeated_output_path_stores_nothing() {
    let store = ArtifactStore::new();
    let err = store
      .put(
        &id("a"),
        vec![
          ("/out".to_string(), tree(&[("f", "1")])),
          ("out".to_string(), tree(&[("f", "2")])),
        ],
      )
      .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateArtifact { .. }));
    assert!(!store.has(&id("a")));
    assert_eq!(store.blob_count(), 0);
  }

  #[test]
  fn identical_content_is_stored_once() {
    let store = ArtifactStore::new();
    store.put(&id("a"), out("/out", tree(&[("f", "same")]))).unwrap();
    store
      .put(
        &id("b"),
        vec![
          ("/dist".to_string(), tree(&[("f", "same")])),
          ("/other".to_string(), tree(&[("g", "different")])),
        ],
      )
      .unwrap();

    assert_eq!(store.blob_count(), 2);
  }

  #[test]
  fn concurrent_readers_see_published_slot() {
    let store = ArtifactStore::new();
    store.put(&id("a"), out("/out", tree(&[("f", "x")]))).unwrap();

    std::thread::scope(|scope| {
      for _ in 0..8 {
        scope.spawn(|| {
          let artifact = store.get(&id("a"), "/out").unwrap();
          assert_eq!(artifact.view().total_size(), 1);
        });
      }
    });
    assert_eq!(store.completed(), vec![id("a")]);
    assert_eq!(store.outputs(&id("a")), vec![PathBuf::from("out")]);
  }
}
