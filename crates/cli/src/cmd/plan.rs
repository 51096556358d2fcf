//! Implementation of the `kiln plan` command.
//!
//! Shows what `kiln build` would run for a terminal stage, without running it:
//! the resolved order, the parallel waves and the stages pruned as dead code.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use kiln_lib::BuildError;

use super::{load_description, resolve_terminal};
use crate::output::{Facts, OutputFormat, Status, print_json, status};

#[derive(Debug, Serialize)]
struct Plan {
  terminal: String,
  order: Vec<String>,
  waves: Vec<Vec<String>>,
  pruned: Vec<String>,
}

pub fn cmd_plan(file: &Path, target: Option<&str>, format: OutputFormat) -> Result<()> {
  let description = load_description(file)?;
  let terminal = resolve_terminal(&description, target)?;
  let graph = &description.graph;

  let waves = graph.waves(&terminal).map_err(BuildError::from)?;
  let pruned = graph.unreachable_from(&terminal).map_err(BuildError::from)?;
  let order = graph.resolve_order().map_err(BuildError::from)?;

  let names = |ids: &[kiln_lib::StageId]| ids.iter().map(ToString::to_string).collect::<Vec<_>>();
  let plan = Plan {
    terminal: terminal.to_string(),
    order: names(&order),
    waves: waves.iter().map(|wave| names(wave)).collect(),
    pruned: names(&pruned),
  };

  if format.is_json() {
    return print_json(&plan);
  }

  status(Status::Plan, &format!("Plan for '{}'", plan.terminal));
  Facts::new()
    .row("Stages", plan.waves.iter().map(Vec::len).sum::<usize>().to_string())
    .row("Resolved order", plan.order.join(", "))
    .print();
  // waves get their own block so their labels align with each other
  plan
    .waves
    .iter()
    .enumerate()
    .fold(Facts::new(), |facts, (index, wave)| facts.row(format!("wave {}", index), wave.join(", ")))
    .print();
  if !plan.pruned.is_empty() {
    status(
      Status::Warning,
      &format!("Not needed by '{}': {}", plan.terminal, plan.pruned.join(", ")),
    );
  }

  Ok(())
}
