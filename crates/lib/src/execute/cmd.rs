//! Shell command execution for stage commands.
//!
//! Commands run in an isolated environment:
//! - All inherited environment variables are cleared
//! - HOME is /homeless-shelter
//! - TMPDIR/TMP/TEMP/TEMPDIR point at the stage's scratch directory
//! - LANG and LC_ALL are C
//! - The caller-supplied environment (PATH, build arguments, stage env) is applied last
//!
//! Output is appended to the stage's own log file rather than the parent's
//! stdout, so concurrently running stages never interleave.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{ExitStatus, Output, Stdio};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Everything a command needs besides its text.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
  pub cwd: &'a Path,
  pub scratch: &'a Path,
  pub env: &'a BTreeMap<String, String>,
  pub shell: Option<&'a str>,
  pub log: &'a Path,
}

/// Run `cmd` through the shell and return its exit status.
///
/// A non-zero status is not an error here; the caller decides what it means.
pub async fn run_command(cmd: &str, ctx: &CommandContext<'_>) -> std::io::Result<ExitStatus> {
  info!(cmd = %cmd, "executing command");

  tokio::fs::create_dir_all(ctx.scratch).await?;

  let (shell_cmd, shell_args) = get_shell(ctx.shell);

  let mut command = Command::new(&shell_cmd);
  command
    .args(&shell_args)
    .arg(cmd)
    .current_dir(ctx.cwd)
    .stdin(Stdio::null())
    .env_clear()
    .env("HOME", "/homeless-shelter")
    .env("TMPDIR", ctx.scratch)
    .env("TMP", ctx.scratch)
    .env("TEMP", ctx.scratch)
    .env("TEMPDIR", ctx.scratch)
    .env("LANG", "C")
    .env("LC_ALL", "C");

  for (key, value) in ctx.env {
    command.env(key, value);
  }

  debug!(shell = %shell_cmd, working_dir = ?ctx.cwd, "spawning process");

  let output = command.output().await?;
  append_log(ctx.log, cmd, &output).await?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
      debug!(stderr = %stderr.trim_end(), "command stderr");
    }
  }

  Ok(output.status)
}

async fn append_log(log: &Path, cmd: &str, output: &Output) -> std::io::Result<()> {
  if let Some(parent) = log.parent() {
    tokio::fs::create_dir_all(parent).await?;
  }
  let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(log).await?;
  file.write_all(format!("$ {}\n", cmd).as_bytes()).await?;
  file.write_all(&output.stdout).await?;
  file.write_all(&output.stderr).await?;
  match output.status.code() {
    Some(code) => file.write_all(format!("[exit {}]\n", code).as_bytes()).await?,
    None => file.write_all(b"[killed by signal]\n").await?,
  }
  file.flush().await
}

/// Get the shell command and argument.
///
/// Defaults to `/bin/sh` rather than `$SHELL`: interactive shells may source
/// profile files that change the environment.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  match override_shell {
    Some(shell) => (shell.to_string(), vec!["-c".to_string()]),
    None => ("/bin/sh".to_string(), vec!["-c".to_string()]),
  }
}
