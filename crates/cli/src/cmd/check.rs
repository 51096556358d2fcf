//! Implementation of the `kiln check` command.

use std::path::Path;

use anyhow::Result;

use kiln_lib::BuildError;

use super::load_description;
use crate::output::{Facts, Status, status};

/// Validate a description without building anything.
///
/// Structural errors fail the command. Missing package metadata and dead
/// stages are only reported, since a build of an intermediate stage does not
/// need them.
pub fn cmd_check(file: &Path) -> Result<()> {
  let description = load_description(file)?;
  let graph = &description.graph;
  graph.resolve_order().map_err(BuildError::from)?;

  let terminal = description.default_terminal();
  if let Some(terminal) = &terminal {
    let dead = graph.unreachable_from(terminal).map_err(BuildError::from)?;
    if !dead.is_empty() {
      let names: Vec<String> = dead.iter().map(ToString::to_string).collect();
      status(Status::Warning, &format!("Not needed by '{}': {}", terminal, names.join(", ")));
    }
  }

  let package = &description.package;
  let required = [
    ("tree", &package.tree),
    ("name", &package.name),
    ("version", &package.version),
    ("architecture", &package.architecture),
    ("maintainer", &package.maintainer),
    ("description", &package.description),
  ];
  for (field, value) in required {
    if value.as_deref().is_none_or(|v| v.trim().is_empty()) {
      status(Status::Warning, &format!("[package] has no '{}'; packaging will fail", field));
    }
  }

  status(Status::Done, &format!("{} is valid", file.display()));
  Facts::new()
    .row("Stages", graph.len().to_string())
    .row_opt("Terminal", terminal.map(|t| t.to_string()))
    .print();

  Ok(())
}
