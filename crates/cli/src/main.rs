mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kiln_lib::BuildError;
use kiln_lib::fetch::FetchError;

use crate::cmd::{BuildArgs, cmd_build, cmd_check, cmd_fetch, cmd_plan};
use crate::output::{OutputFormat, Status, status};

/// kiln - reproducible multi-stage package builds
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build a terminal stage and package its installed tree
  Build(BuildArgs),

  /// Show the stages a build would run, without running them
  Plan {
    /// Stage description file
    #[arg(default_value = "kiln.toml")]
    file: PathBuf,

    /// Terminal stage (default: `[package].stage`, else the last stage)
    #[arg(short, long)]
    target: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
  },

  /// Validate a stage description
  Check {
    /// Stage description file
    #[arg(default_value = "kiln.toml")]
    file: PathBuf,
  },

  /// Download a file into the verified cache
  Fetch {
    url: String,

    /// Expected SHA-256 digest, optionally prefixed with `sha256:`
    digest: String,

    /// Cache directory (default: $KILN_CACHE_DIR or ~/.cache/kiln, plus /downloads)
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let level = if cli.verbose { "debug" } else { "info" };
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("kiln={0},kiln_lib={0}", level)));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result = match cli.command {
    Commands::Build(args) => cmd_build(args),
    Commands::Plan { file, target, format } => cmd_plan(&file, target.as_deref(), format),
    Commands::Check { file } => cmd_check(&file),
    Commands::Fetch {
      url,
      digest,
      cache,
      format,
    } => cmd_fetch(&url, &digest, cache, format),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      status(Status::Failed, &format!("{:#}", err));
      ExitCode::from(exit_code(&err))
    }
  }
}

fn exit_code(err: &anyhow::Error) -> u8 {
  if let Some(build) = err.downcast_ref::<BuildError>() {
    return build.exit_code();
  }
  match err.downcast_ref::<FetchError>() {
    Some(FetchError::DigestMismatch { .. }) => 6,
    _ => 1,
  }
}
