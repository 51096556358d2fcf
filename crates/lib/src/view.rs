//! In-memory filesystem views.
//!
//! An `FsView` is an immutable-by-convention snapshot of a file tree: an
//! ordered map from relative path to entry, where the empty path is the root
//! itself (a directory, or a single file when a file was captured). Views are
//! plain values: artifacts, base images and stage results are all `FsView`s,
//! and every stage materializes its own private copy before running commands.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use walkdir::WalkDir;

use crate::util::hash::{ContentHash, hash_bytes};

#[derive(Debug, Error)]
pub enum ViewError {
  #[error("path '{0}' escapes the view root")]
  InvalidPath(String),

  #[error("'{}' does not exist", .0.display())]
  NotFound(PathBuf),

  #[error("failed to walk {}: {message}", .path.display())]
  Walk { path: PathBuf, message: String },

  #[error("io error at {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl ViewError {
  fn io(path: &Path, source: std::io::Error) -> Self {
    ViewError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

/// One node of a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
  Dir,
  File { data: Arc<[u8]>, executable: bool },
  Symlink { target: PathBuf },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsView {
  entries: BTreeMap<PathBuf, Entry>,
}

/// Turn a user-facing path (`/usr/bin`, `./out`, `pkg/`) into a view-relative one.
///
/// Leading `/` and `.` components are dropped; `..` is rejected. An empty
/// result names the root.
pub fn rel_path(path: &str) -> Result<PathBuf, ViewError> {
  let mut rel = PathBuf::new();
  for component in Path::new(path).components() {
    match component {
      Component::Normal(part) => rel.push(part),
      Component::RootDir | Component::CurDir => {}
      Component::ParentDir | Component::Prefix(_) => return Err(ViewError::InvalidPath(path.to_string())),
    }
  }
  Ok(rel)
}

impl FsView {
  /// A view holding only an empty root directory.
  pub fn empty_dir() -> Self {
    let mut entries = BTreeMap::new();
    entries.insert(PathBuf::new(), Entry::Dir);
    Self { entries }
  }

  /// Snapshot the tree at `root`. Symlinks below the root are recorded, not followed.
  pub fn capture(root: &Path) -> Result<Self, ViewError> {
    if let Err(e) = fs::symlink_metadata(root) {
      return Err(if e.kind() == std::io::ErrorKind::NotFound {
        ViewError::NotFound(root.to_path_buf())
      } else {
        ViewError::io(root, e)
      });
    }

    let mut entries = BTreeMap::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
      let entry = entry.map_err(|e| ViewError::Walk {
        path: root.to_path_buf(),
        message: e.to_string(),
      })?;
      let path = entry.path();
      let rel = path.strip_prefix(root).unwrap_or(path).to_path_buf();
      let file_type = entry.file_type();

      let node = if file_type.is_dir() {
        Entry::Dir
      } else if file_type.is_file() {
        let data = fs::read(path).map_err(|e| ViewError::io(path, e))?;
        let meta = entry.metadata().map_err(|e| ViewError::Walk {
          path: path.to_path_buf(),
          message: e.to_string(),
        })?;
        Entry::File {
          data: data.into(),
          executable: meta.permissions().mode() & 0o111 != 0,
        }
      } else if file_type.is_symlink() {
        let target = fs::read_link(path).map_err(|e| ViewError::io(path, e))?;
        Entry::Symlink { target }
      } else {
        // sockets, fifos and devices have no place in an artifact
        continue;
      };
      entries.insert(rel, node);
    }

    Ok(Self { entries })
  }

  /// Write the view onto `dest`, merging with whatever is already there.
  ///
  /// Directories are merged, files and symlinks replace existing entries.
  pub fn materialize(&self, dest: &Path) -> Result<(), ViewError> {
    for (rel, node) in &self.entries {
      let target = if rel.as_os_str().is_empty() {
        dest.to_path_buf()
      } else {
        dest.join(rel)
      };

      match node {
        Entry::Dir => {
          if fs::symlink_metadata(&target).is_ok_and(|m| !m.is_dir()) {
            fs::remove_file(&target).map_err(|e| ViewError::io(&target, e))?;
          }
          fs::create_dir_all(&target).map_err(|e| ViewError::io(&target, e))?;
        }
        Entry::File { data, executable } => {
          prepare_leaf(&target)?;
          fs::write(&target, data).map_err(|e| ViewError::io(&target, e))?;
          let mode = if *executable { 0o755 } else { 0o644 };
          fs::set_permissions(&target, fs::Permissions::from_mode(mode)).map_err(|e| ViewError::io(&target, e))?;
        }
        Entry::Symlink { target: link } => {
          prepare_leaf(&target)?;
          std::os::unix::fs::symlink(link, &target).map_err(|e| ViewError::io(&target, e))?;
        }
      }
    }
    Ok(())
  }

  /// The part of the view rooted at `rel`, re-rooted so `rel` becomes the empty path.
  pub fn subtree(&self, rel: &Path) -> Option<FsView> {
    if rel.as_os_str().is_empty() {
      return Some(self.clone());
    }
    let entries: BTreeMap<PathBuf, Entry> = self
      .entries
      .range(rel.to_path_buf()..)
      .take_while(|(path, _)| path.starts_with(rel))
      .filter_map(|(path, node)| path.strip_prefix(rel).ok().map(|p| (p.to_path_buf(), node.clone())))
      .collect();
    if entries.is_empty() { None } else { Some(Self { entries }) }
  }

  /// Add or replace a single entry. Missing parent directories are added too.
  pub fn insert(&mut self, rel: PathBuf, node: Entry) {
    let mut parent = rel.parent();
    while let Some(dir) = parent {
      self.entries.entry(dir.to_path_buf()).or_insert(Entry::Dir);
      parent = dir.parent();
    }
    self.entries.insert(rel, node);
  }

  pub fn insert_file(&mut self, rel: &str, data: &[u8], executable: bool) -> Result<(), ViewError> {
    let rel = rel_path(rel)?;
    self.insert(
      rel,
      Entry::File {
        data: data.into(),
        executable,
      },
    );
    Ok(())
  }

  pub fn get(&self, rel: &Path) -> Option<&Entry> {
    self.entries.get(rel)
  }

  /// The root entry: `Dir` for trees, `File` when a single file was captured.
  pub fn root(&self) -> Option<&Entry> {
    self.entries.get(Path::new(""))
  }

  pub fn root_is_file(&self) -> bool {
    matches!(self.root(), Some(Entry::File { .. }))
  }

  pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &Entry)> {
    self.entries.iter()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Total bytes held by regular files.
  pub fn total_size(&self) -> u64 {
    self
      .entries
      .values()
      .map(|node| match node {
        Entry::File { data, .. } => data.len() as u64,
        _ => 0,
      })
      .sum()
  }

  /// Content digest over paths, bytes, executable bits and link targets.
  ///
  /// Timestamps and ownership never enter the digest.
  pub fn digest(&self) -> ContentHash {
    let mut manifest = String::new();
    for (rel, node) in &self.entries {
      let rel = rel.to_string_lossy();
      let line = match node {
        Entry::Dir => format!("D:{rel}"),
        Entry::File { data, executable } => {
          let mode = if *executable { "x" } else { "-" };
          format!("F:{rel}:{mode}:{}", hash_bytes(data))
        }
        Entry::Symlink { target } => format!("L:{rel}:{}", target.to_string_lossy()),
      };
      manifest.push_str(&line);
      manifest.push('\n');
    }
    hash_bytes(manifest.as_bytes())
  }
}

/// Make room for a file or symlink at `target`.
fn prepare_leaf(target: &Path) -> Result<(), ViewError> {
  if let Some(parent) = target.parent() {
    fs::create_dir_all(parent).map_err(|e| ViewError::io(parent, e))?;
  }
  match fs::symlink_metadata(target) {
    Ok(meta) if meta.is_dir() => fs::remove_dir_all(target).map_err(|e| ViewError::io(target, e)),
    Ok(_) => fs::remove_file(target).map_err(|e| ViewError::io(target, e)),
    Err(_) => Ok(()),
  }
}
