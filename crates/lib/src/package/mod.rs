//! Turns a finished staging root into an installable `.deb`.
//!
//! All validation happens before anything is written, and the archive is
//! renamed into the output directory only once it is complete, so a failed
//! `assemble` leaves no file behind.

mod control;
mod deb;

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use control::ControlFile;

use crate::consts::{CONTROL_DIR, CONTROL_FILE, SOURCE_DATE_EPOCH};
use crate::stage::{ResolvedArgs, substitute};
use crate::view::{Entry, FsView, ViewError, rel_path};

/// Control fields the packager renders itself.
const GENERATED_FIELDS: [&str; 6] = [
  "Package",
  "Version",
  "Architecture",
  "Maintainer",
  "Installed-Size",
  "Description",
];

#[derive(Debug, Error)]
pub enum PackageError {
  #[error("missing required manifest field '{field}'")]
  MissingManifestField { field: String },

  #[error("staging root '{}' has nothing to package", .path.display())]
  EmptyStagingRoot { path: PathBuf },

  #[error("malformed control file at line {line}: '{content}'")]
  InvalidControl { line: usize, content: String },

  #[error(transparent)]
  View(#[from] ViewError),

  #[error("failed to write archive: {0}")]
  Io(#[from] std::io::Error),
}

/// Package metadata plus the record of what the terminal stage copied in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingManifest {
  pub package: Option<String>,
  pub version: Option<String>,
  pub architecture: Option<String>,
  pub maintainer: Option<String>,
  pub description: Option<String>,
  /// Installed-file tree root inside the terminal stage's view.
  pub tree: Option<String>,
  /// Extra control fields, rendered after the staged ones.
  #[serde(default)]
  pub fields: BTreeMap<String, String>,
  /// Destinations of the terminal stage's copy-operations, in execution order.
  #[serde(default, skip_deserializing)]
  pub contents: Vec<String>,
}

/// Required fields after validation.
struct Required<'a> {
  package: &'a str,
  version: &'a str,
  architecture: &'a str,
  maintainer: &'a str,
  description: &'a str,
}

impl StagingManifest {
  pub fn record(&mut self, dst: impl Into<String>) {
    self.contents.push(dst.into());
  }

  /// Resolve `${ARG}` references in every string field.
  pub fn substituted(&self, args: &ResolvedArgs) -> Self {
    let sub = |value: &Option<String>| value.as_deref().map(|v| substitute(v, args));
    Self {
      package: sub(&self.package),
      version: sub(&self.version),
      architecture: sub(&self.architecture),
      maintainer: sub(&self.maintainer),
      description: sub(&self.description),
      tree: sub(&self.tree),
      fields: self
        .fields
        .iter()
        .map(|(name, value)| (name.clone(), substitute(value, args)))
        .collect(),
      contents: self.contents.clone(),
    }
  }

  /// The staging root under `stage_root`, from the `tree` field.
  pub fn staging_root(&self, stage_root: &Path) -> Result<PathBuf, PackageError> {
    let tree = non_empty(&self.tree, "tree")?;
    Ok(stage_root.join(rel_path(tree)?))
  }

  fn require(&self) -> Result<Required<'_>, PackageError> {
    Ok(Required {
      package: non_empty(&self.package, "package")?,
      version: non_empty(&self.version, "version")?,
      architecture: non_empty(&self.architecture, "architecture")?,
      maintainer: non_empty(&self.maintainer, "maintainer")?,
      description: non_empty(&self.description, "description")?,
    })
  }
}

fn non_empty<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, PackageError> {
  match value.as_deref().map(str::trim) {
    Some(v) if !v.is_empty() => Ok(v),
    _ => Err(PackageError::MissingManifestField {
      field: field.to_string(),
    }),
  }
}

#[derive(Debug, Clone)]
pub struct Packager {
  output_dir: PathBuf,
  source_date_epoch: u64,
}

impl Packager {
  pub fn new(output_dir: impl Into<PathBuf>) -> Self {
    Self {
      output_dir: output_dir.into(),
      source_date_epoch: SOURCE_DATE_EPOCH,
    }
  }

  pub fn with_source_date_epoch(mut self, epoch: u64) -> Self {
    self.source_date_epoch = epoch;
    self
  }

  pub fn output_dir(&self) -> &Path {
    &self.output_dir
  }

  /// Validate and assemble, then move the archive into the output directory.
  pub fn assemble(&self, staging_root: &Path, manifest: &StagingManifest) -> Result<PathBuf, PackageError> {
    let (name, bytes) = self.build_archive(staging_root, manifest)?;

    fs::create_dir_all(&self.output_dir)?;
    let dest = self.output_dir.join(&name);
    let mut partial = tempfile::Builder::new()
      .prefix(".partial-")
      .suffix(".deb")
      .tempfile_in(&self.output_dir)?;
    partial.write_all(&bytes)?;
    partial.as_file().sync_all()?;
    partial.persist(&dest).map_err(|e| PackageError::Io(e.error))?;

    info!(archive = %dest.display(), bytes = bytes.len(), "package assembled");
    Ok(dest)
  }

  /// Produce the archive file name and bytes without touching the output directory.
  pub fn build_archive(&self, staging_root: &Path, manifest: &StagingManifest) -> Result<(String, Vec<u8>), PackageError> {
    let required = manifest.require()?;

    let view = match FsView::capture(staging_root) {
      Ok(view) => view,
      Err(ViewError::NotFound(_)) => {
        return Err(PackageError::EmptyStagingRoot {
          path: staging_root.to_path_buf(),
        });
      }
      Err(e) => return Err(e.into()),
    };
    if !matches!(view.root(), Some(Entry::Dir)) || view.len() <= 1 {
      return Err(PackageError::EmptyStagingRoot {
        path: staging_root.to_path_buf(),
      });
    }

    let control_path = Path::new(CONTROL_DIR).join(CONTROL_FILE);
    let staged_control = match view.get(&control_path) {
      Some(Entry::File { data, .. }) => ControlFile::parse(&String::from_utf8_lossy(data))?,
      _ => {
        return Err(PackageError::MissingManifestField {
          field: format!("{}/{}", CONTROL_DIR, CONTROL_FILE),
        });
      }
    };

    let data: Vec<(&Path, &Entry)> = view
      .iter()
      .filter(|(rel, _)| !rel.starts_with(CONTROL_DIR))
      .map(|(rel, entry)| (rel.as_path(), entry))
      .collect();
    if data.len() <= 1 {
      return Err(PackageError::EmptyStagingRoot {
        path: staging_root.to_path_buf(),
      });
    }

    let installed_bytes: u64 = data
      .iter()
      .map(|(_, entry)| match entry {
        Entry::File { data, .. } => data.len() as u64,
        _ => 0,
      })
      .sum();
    let control = render_control(&required, &staged_control, &manifest.fields, installed_bytes);

    let mut control_view = FsView::empty_dir();
    if let Some(debian) = view.subtree(Path::new(CONTROL_DIR)) {
      for (rel, entry) in debian.iter() {
        if rel.as_os_str().is_empty() || rel == Path::new(CONTROL_FILE) || rel == Path::new("md5sums") {
          continue;
        }
        control_view.insert(rel.clone(), entry.clone());
      }
    }
    control_view.insert_file(CONTROL_FILE, control.as_bytes(), false)?;
    control_view.insert_file("md5sums", md5sums(&data).as_bytes(), false)?;

    let epoch = self.source_date_epoch;
    let control_tar = deb::tar_gz(control_view.iter().map(|(p, e)| (p.as_path(), e)), epoch)?;
    let data_tar = deb::tar_gz(data.iter().copied(), epoch)?;
    let bytes = deb::deb_archive(&control_tar, &data_tar, epoch)?;

    debug!(
      package = required.package,
      entries = data.len(),
      control_bytes = control_tar.len(),
      data_bytes = data_tar.len(),
      "archive members built"
    );

    Ok((archive_name(&required), bytes))
  }
}

/// `<package>_<version>_<arch>.deb`, with any version epoch dropped as dpkg does.
fn archive_name(required: &Required<'_>) -> String {
  let version = required
    .version
    .split_once(':')
    .map(|(_, upstream)| upstream)
    .unwrap_or(required.version);
  format!("{}_{}_{}.deb", required.package, version, required.architecture)
}

fn render_control(
  required: &Required<'_>,
  staged: &ControlFile,
  extra: &BTreeMap<String, String>,
  installed_bytes: u64,
) -> String {
  let mut control = ControlFile::default();
  control.set("Package", required.package);
  control.set("Version", required.version);
  control.set("Architecture", required.architecture);
  control.set("Maintainer", required.maintainer);

  for (name, value) in staged.iter() {
    if GENERATED_FIELDS.iter().any(|g| g.eq_ignore_ascii_case(name)) {
      if let Some(ours) = control.get(name)
        && ours != value
      {
        warn!(field = name, staged = value, manifest = ours, "staged control field overridden by manifest");
      }
      continue;
    }
    control.set(name, value);
  }
  for (name, value) in extra {
    control.set(name, value);
  }

  control.set("Installed-Size", &installed_bytes.div_ceil(1024).to_string());
  control.set("Description", required.description);
  control.render()
}

fn md5sums(data: &[(&Path, &Entry)]) -> String {
  let mut out = String::new();
  for (rel, entry) in data {
    if let Entry::File { data, .. } = entry {
      let digest = Md5::digest(data);
      out.push_str(&hex::encode(digest));
      out.push_str("  ");
      out.push_str(&rel.to_string_lossy());
      out.push('\n');
    }
  }
  out
}
