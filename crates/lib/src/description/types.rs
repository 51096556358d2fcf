use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::package::StagingManifest;
use crate::stage::{Stage, StageId};

/// A stage description document as written on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Document {
  #[serde(default)]
  pub package: Option<PackageSection>,
  #[serde(default)]
  pub stage: Vec<Stage>,
}

/// The `[package]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSection {
  /// Terminal stage built when none is given on the command line.
  pub stage: Option<StageId>,
  /// Installed-file tree inside the terminal stage's view.
  pub tree: Option<String>,
  pub name: Option<String>,
  pub version: Option<String>,
  pub architecture: Option<String>,
  pub maintainer: Option<String>,
  pub description: Option<String>,
  #[serde(default)]
  pub fields: BTreeMap<String, String>,
}

impl PackageSection {
  pub fn manifest(&self) -> StagingManifest {
    StagingManifest {
      package: self.name.clone(),
      version: self.version.clone(),
      architecture: self.architecture.clone(),
      maintainer: self.maintainer.clone(),
      description: self.description.clone(),
      tree: self.tree.clone(),
      fields: self.fields.clone(),
      contents: Vec::new(),
    }
  }
}
