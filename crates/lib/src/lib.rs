//! kiln-lib: a reproducible multi-stage build engine
//!
//! This crate builds software through a graph of isolated stages and packages
//! the result:
//! - `Stage`: one unit of build work with its base, inputs, commands and outputs
//! - `BuildGraph`: the stage dependency graph, ordering and parallel execution
//! - `ArtifactStore`: publish-once, read-many holder of stage outputs
//! - `ChecksumFetcher`: digest-verified downloads of external dependencies
//! - `Packager`: deterministic `.deb` assembly from a staging root

pub mod build;
pub mod consts;
pub mod description;
pub mod execute;
pub mod fetch;
pub mod graph;
pub mod package;
pub mod platform;
pub mod stage;
pub mod store;
pub mod util;
pub mod view;

pub use build::{BuildError, BuildOutcome, Builder};
pub use description::BuildDescription;
pub use execute::{BuildConfig, StageExecutor};
pub use fetch::ChecksumFetcher;
pub use graph::BuildGraph;
pub use package::{Packager, StagingManifest};
pub use stage::{Stage, StageId};
pub use store::ArtifactStore;
pub use view::FsView;
