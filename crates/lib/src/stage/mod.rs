//! Stage declarations and build-argument handling.
//!
//! A `Stage` is a named, immutable recipe: a base (image or another stage),
//! declared build arguments, copy-operations, external fetches, commands and
//! the output paths it publishes. Stages never mutate each other; everything
//! a stage sees arrives through its base view and its copy-operations.

mod args;
mod types;

pub use args::{ArgError, ResolvedArgs, resolve_args, substitute, unused_overrides};
pub use types::{Base, BuildArg, CopyOp, CopySource, EdgeKind, ExternalDependency, Stage, StageId};
