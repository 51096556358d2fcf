//! Declarative stage description documents.
//!
//! A description is a TOML file with an optional `[package]` table and an
//! ordered `[[stage]]` array:
//!
//! ```toml
//! [package]
//! stage = "pack"
//! tree = "/pkg"
//! name = "cross-tools"
//! version = "${VERSION}"
//! architecture = "arm64"
//! maintainer = "Build Team <build@example.com>"
//! description = "Cross-compiled tools"
//!
//! [[stage]]
//! name = "base"
//! base = { image = "scratch" }
//! commands = ["mkdir -p out"]
//!
//! [[stage]]
//! name = "pack"
//! base = { stage = "base" }
//! args = [{ name = "VERSION", default = "1.0" }]
//! copy = [{ from = "local", src = "debian/", dst = "/pkg/DEBIAN" }]
//! ```
//!
//! Stages are declared in document order, so a stage may only name stages
//! that appear above it.

mod types;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

pub use types::{Document, PackageSection};

use crate::graph::{BuildGraph, GraphError};
use crate::package::StagingManifest;
use crate::stage::StageId;

#[derive(Debug, Error)]
pub enum DescriptionError {
  #[error("failed to read {}: {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid description: {0}")]
  Parse(#[from] toml::de::Error),

  #[error(transparent)]
  Graph(#[from] GraphError),
}

/// A validated stage graph plus the package metadata that goes with it.
#[derive(Debug, Default)]
pub struct BuildDescription {
  pub graph: BuildGraph,
  pub package: PackageSection,
}

impl BuildDescription {
  pub fn load(path: &Path) -> Result<Self, DescriptionError> {
    let text = std::fs::read_to_string(path).map_err(|source| DescriptionError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let description = Self::parse(&text)?;
    debug!(path = %path.display(), stages = description.graph.len(), "description loaded");
    Ok(description)
  }

  pub fn parse(text: &str) -> Result<Self, DescriptionError> {
    let document: Document = toml::from_str(text)?;
    Self::from_document(document)
  }

  pub fn from_document(document: Document) -> Result<Self, DescriptionError> {
    let mut graph = BuildGraph::new();
    for stage in document.stage {
      graph.add_stage(stage)?;
    }
    Ok(Self {
      graph,
      package: document.package.unwrap_or_default(),
    })
  }

  /// The terminal stage named by `[package].stage`, else the last declared stage.
  pub fn default_terminal(&self) -> Option<StageId> {
    self
      .package
      .stage
      .clone()
      .or_else(|| self.graph.stages().last().map(|stage| stage.name.clone()))
  }

  pub fn manifest(&self) -> StagingManifest {
    self.package.manifest()
  }
}
