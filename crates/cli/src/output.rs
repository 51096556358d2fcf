//! Terminal output for kiln commands.
//!
//! Text output is a status line followed by aligned `label: value` blocks.
//! `--format json` replaces both with one pretty-printed document on stdout.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{AnsiColors, OwoColorize, Stream};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

/// Marker leading a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  Done,
  Failed,
  Warning,
  Plan,
}

impl Status {
  fn symbol(self) -> &'static str {
    match self {
      Status::Done => "✓",
      Status::Failed => "✗",
      Status::Warning => "⚠",
      Status::Plan => "•",
    }
  }

  fn colour(self) -> AnsiColors {
    match self {
      Status::Done => AnsiColors::Green,
      Status::Failed => AnsiColors::Red,
      Status::Warning => AnsiColors::Yellow,
      Status::Plan => AnsiColors::Blue,
    }
  }

  /// Failures and warnings go to stderr so stdout stays parseable.
  fn to_stderr(self) -> bool {
    matches!(self, Status::Failed | Status::Warning)
  }
}

pub fn status(status: Status, message: &str) {
  let colour = status.colour();
  let symbol = status.symbol();
  if status.to_stderr() {
    let marker = symbol.if_supports_color(Stream::Stderr, |s| s.color(colour));
    eprintln!("{} {}", marker, message);
  } else {
    let marker = symbol.if_supports_color(Stream::Stdout, |s| s.color(colour));
    println!("{} {}", marker, message);
  }
}

/// Rows printed under a status line, labels padded to a shared column.
#[derive(Debug, Default)]
pub struct Facts {
  rows: Vec<(String, String)>,
}

impl Facts {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn row(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
    self.rows.push((label.into(), value.into()));
    self
  }

  /// Adds the row only when there is something to show.
  pub fn row_opt(self, label: impl Into<String>, value: Option<impl Into<String>>) -> Self {
    match value {
      Some(value) => self.row(label, value),
      None => self,
    }
  }

  fn aligned(&self) -> impl Iterator<Item = (String, &str)> {
    let width = self.rows.iter().map(|(label, _)| label.chars().count() + 1).max().unwrap_or(0);
    self
      .rows
      .iter()
      .map(move |(label, value)| (format!("{:<width$}", format!("{}:", label)), value.as_str()))
  }

  pub fn print(&self) {
    for (label, value) in self.aligned() {
      println!("  {} {}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()), value);
    }
  }
}

/// Archive sizes in binary units: `512 B`, `1.5 KiB`, `3.0 MiB`.
pub fn human_size(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

  if bytes < 1024 {
    return format!("{} B", bytes);
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit + 1 < UNITS.len() {
    value /= 1024.0;
    unit += 1;
  }
  format!("{:.1} {}", value, UNITS[unit])
}

/// Wall-clock time of a command, to millisecond precision.
pub fn elapsed(duration: Duration) -> String {
  let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
  humantime::format_duration(Duration::from_millis(millis)).to_string()
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
