//! Build-argument resolution and `${NAME}` substitution.
//!
//! Arguments are resolved once per stage invocation from three explicit
//! sources, in order: the caller's overrides, the stage's declared default,
//! and the value the base stage resolved for an argument of the same name.
//! There is no ambient argument environment.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use thiserror::Error;

use super::types::{Stage, StageId};

#[derive(Debug, Error)]
pub enum ArgError {
  #[error("stage '{stage}' requires build argument '{name}' but no value was provided")]
  MissingBuildArg { stage: StageId, name: String },
}

/// The argument values visible to one stage invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResolvedArgs(BTreeMap<String, String>);

impl ResolvedArgs {
  pub fn get(&self, name: &str) -> Option<&str> {
    self.0.get(name).map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
    self.0.iter()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl FromIterator<(String, String)> for ResolvedArgs {
  fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
    ResolvedArgs(iter.into_iter().collect())
  }
}

/// Resolve the declared arguments of `stage`.
///
/// Only declared arguments are visible. `inherited` is the base stage's
/// resolved set when the stage is layered on another stage.
pub fn resolve_args(
  stage: &Stage,
  overrides: &BTreeMap<String, String>,
  inherited: Option<&ResolvedArgs>,
) -> Result<ResolvedArgs, ArgError> {
  let mut resolved = BTreeMap::new();

  for arg in &stage.args {
    let value = overrides
      .get(&arg.name)
      .cloned()
      .or_else(|| arg.default.clone())
      .or_else(|| inherited.and_then(|base| base.get(&arg.name)).map(str::to_string))
      .ok_or_else(|| ArgError::MissingBuildArg {
        stage: stage.name.clone(),
        name: arg.name.clone(),
      })?;
    resolved.insert(arg.name.clone(), value);
  }

  Ok(ResolvedArgs(resolved))
}

/// Replace `${NAME}` with the value of a resolved argument.
///
/// References to names that are not resolved arguments are left untouched so
/// shell variables keep working. `$${` produces a literal `${`.
pub fn substitute(text: &str, args: &ResolvedArgs) -> String {
  let mut out = String::with_capacity(text.len());
  let mut rest = text;

  while let Some(pos) = rest.find('$') {
    out.push_str(&rest[..pos]);
    let tail = &rest[pos..];

    if let Some(after) = tail.strip_prefix("$${") {
      out.push_str("${");
      rest = after;
      continue;
    }

    if let Some(body) = tail.strip_prefix("${")
      && let Some(end) = body.find('}')
      && let Some(value) = args.get(&body[..end])
    {
      out.push_str(value);
      rest = &body[end + 1..];
      continue;
    }

    out.push('$');
    rest = &tail[1..];
  }

  out.push_str(rest);
  out
}

/// Override names that no stage in `stages` declares.
pub fn unused_overrides<'a>(
  stages: impl IntoIterator<Item = &'a Stage>,
  overrides: &BTreeMap<String, String>,
) -> Vec<String> {
  let declared: BTreeSet<&str> = stages
    .into_iter()
    .flat_map(|stage| stage.args.iter().map(|arg| arg.name.as_str()))
    .collect();
  overrides
    .keys()
    .filter(|name| !declared.contains(name.as_str()))
    .cloned()
    .collect()
}
