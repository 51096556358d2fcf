use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::consts::LOCAL_SOURCE;

/// Unique name of a stage within one build graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(pub String);

impl std::fmt::Display for StageId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<&str> for StageId {
  fn from(name: &str) -> Self {
    StageId(name.to_string())
  }
}

impl From<String> for StageId {
  fn from(name: String) -> Self {
    StageId(name)
  }
}

/// Where a stage's initial root view comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Base {
  /// A named base image, resolved through the configured image map.
  Image(String),
  /// The final view of another stage in the same graph.
  Stage(StageId),
}

/// A declared build argument with an optional default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildArg {
  pub name: String,
  #[serde(default)]
  pub default: Option<String>,
}

/// Source of a copy-operation: the local build context or a prior stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CopySource {
  Local,
  Stage(StageId),
}

impl From<String> for CopySource {
  fn from(value: String) -> Self {
    if value == LOCAL_SOURCE {
      CopySource::Local
    } else {
      CopySource::Stage(StageId(value))
    }
  }
}

impl From<CopySource> for String {
  fn from(value: CopySource) -> Self {
    match value {
      CopySource::Local => LOCAL_SOURCE.to_string(),
      CopySource::Stage(id) => id.0,
    }
  }
}

/// Copy `src` from a source into the stage's view at `dst`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopyOp {
  pub from: CopySource,
  pub src: String,
  pub dst: String,
}

/// A remote file pinned by its SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalDependency {
  pub url: String,
  pub sha256: String,
  /// Path inside the stage view the verified file is placed at.
  pub dest: String,
}

/// Why one stage depends on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
  Base,
  CopyFrom,
}

/// An immutable build-stage record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stage {
  pub name: StageId,
  pub base: Base,
  #[serde(default)]
  pub args: Vec<BuildArg>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  #[serde(default)]
  pub workdir: Option<String>,
  #[serde(default)]
  pub copy: Vec<CopyOp>,
  #[serde(default)]
  pub fetch: Vec<ExternalDependency>,
  #[serde(default)]
  pub commands: Vec<String>,
  #[serde(default)]
  pub outputs: Vec<String>,
}

impl Stage {
  pub fn new(name: impl Into<StageId>, base: Base) -> Self {
    Self {
      name: name.into(),
      base,
      args: Vec::new(),
      env: BTreeMap::new(),
      workdir: None,
      copy: Vec::new(),
      fetch: Vec::new(),
      commands: Vec::new(),
      outputs: Vec::new(),
    }
  }

  /// Convenience for a stage based on an image.
  pub fn from_image(name: impl Into<StageId>, image: &str) -> Self {
    Self::new(name, Base::Image(image.to_string()))
  }

  /// Convenience for a stage based on another stage.
  pub fn from_stage(name: impl Into<StageId>, base: &str) -> Self {
    Self::new(name, Base::Stage(StageId::from(base)))
  }

  pub fn with_arg(mut self, name: &str, default: Option<&str>) -> Self {
    self.args.push(BuildArg {
      name: name.to_string(),
      default: default.map(str::to_string),
    });
    self
  }

  pub fn with_env(mut self, key: &str, value: &str) -> Self {
    self.env.insert(key.to_string(), value.to_string());
    self
  }

  pub fn with_workdir(mut self, dir: &str) -> Self {
    self.workdir = Some(dir.to_string());
    self
  }

  pub fn with_copy(mut self, from: CopySource, src: &str, dst: &str) -> Self {
    self.copy.push(CopyOp {
      from,
      src: src.to_string(),
      dst: dst.to_string(),
    });
    self
  }

  /// Shorthand for copying from another stage.
  pub fn with_copy_from(self, stage: &str, src: &str, dst: &str) -> Self {
    self.with_copy(CopySource::Stage(StageId::from(stage)), src, dst)
  }

  pub fn with_fetch(mut self, url: &str, sha256: &str, dest: &str) -> Self {
    self.fetch.push(ExternalDependency {
      url: url.to_string(),
      sha256: sha256.to_string(),
      dest: dest.to_string(),
    });
    self
  }

  pub fn with_command(mut self, command: &str) -> Self {
    self.commands.push(command.to_string());
    self
  }

  pub fn with_output(mut self, path: &str) -> Self {
    self.outputs.push(path.to_string());
    self
  }

  /// The stage this one is layered on, if any.
  pub fn base_stage(&self) -> Option<&StageId> {
    match &self.base {
      Base::Stage(id) => Some(id),
      Base::Image(_) => None,
    }
  }

  /// Stages this stage reads from, base first, then copy sources in order.
  ///
  /// Each referenced stage appears once, tagged with the first way it was referenced.
  pub fn dependencies(&self) -> Vec<(StageId, EdgeKind)> {
    let mut deps: Vec<(StageId, EdgeKind)> = Vec::new();
    if let Some(base) = self.base_stage() {
      deps.push((base.clone(), EdgeKind::Base));
    }
    for op in &self.copy {
      if let CopySource::Stage(id) = &op.from
        && !deps.iter().any(|(seen, _)| seen == id)
      {
        deps.push((id.clone(), EdgeKind::CopyFrom));
      }
    }
    deps
  }
}
