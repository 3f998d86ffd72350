//! Staged pipeline driver for operating-system image builds.
//!
//! A run checks out source, fetches and unpacks a prebuilt snapshot, builds
//! the image inside an optional sandbox, stages the artifacts and publishes
//! them, and on nightly builds produces, signs and publishes an update
//! package.
//!
//! # Architecture
//!
//! ```text
//! image-builder (binary)
//!     │
//!     ├── config::resolve      CLI > scheduler properties > TOML file > defaults
//!     ├── paths::RunPaths      every location a run touches
//!     └── stages::pipeline()   fixed catalogue, selection run in order
//!             │
//!             ├── exec         the only process-spawning surface
//!             │     └── classify   output lines → severity
//!             ├── collab       git, curl, rsync, signing behind traits
//!             ├── snapshot     skip re-unpacking an unchanged snapshot
//!             ├── publish      artifact resolution, bundling, destinations
//!             └── updates      update.xml generation
//! ```
//!
//! Stage failures are fatal and stop the run; a failed upload only degrades
//! it. Every run leaves a JSON [`report::RunReport`] in its log directory.

pub mod archive;
pub mod classify;
pub mod collab;
pub mod config;
pub mod exec;
pub mod fsutil;
pub mod metadata;
pub mod paths;
pub mod pipeline;
pub mod preflight;
pub mod publish;
pub mod report;
pub mod snapshot;
pub mod stages;
pub mod updates;

pub use config::{ConfigError, RunConfig};
pub use exec::{CommandRunner, ExecutionOutcome, Invocation, SandboxedExecutor};
pub use pipeline::{RunStatus, RunSummary, StageError, StageOutcome, StageSelection};
pub use stages::BuildRun;
