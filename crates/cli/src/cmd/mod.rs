mod build;
mod check;
mod fetch;
mod plan;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kiln_lib::{BuildDescription, BuildError, StageId};

pub use build::{BuildArgs, cmd_build};
pub use check::cmd_check;
pub use fetch::cmd_fetch;
pub use plan::cmd_plan;

/// Load a description, keeping `BuildError` at the root of the error so the exit code survives.
fn load_description(file: &Path) -> Result<BuildDescription> {
  Ok(BuildDescription::load(file).map_err(BuildError::from)?)
}

/// The explicit target, else the description's default terminal.
fn resolve_terminal(description: &BuildDescription, target: Option<&str>) -> Result<StageId> {
  target
    .map(StageId::from)
    .or_else(|| description.default_terminal())
    .ok_or(BuildError::NoTerminal)
    .context("Cannot choose a stage to build")
}

/// Parse `NAME=VALUE`.
fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
  let (key, value) = raw
    .split_once('=')
    .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
  if key.is_empty() {
    return Err(format!("empty name in '{}'", raw));
  }
  Ok((key.to_string(), value.to_string()))
}

/// Directory `local` copies resolve against when `--context` is not given.
fn default_context(file: &Path) -> PathBuf {
  match file.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
    _ => PathBuf::from("."),
  }
}
