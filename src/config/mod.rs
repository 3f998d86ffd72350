//! Effective run configuration.
//!
//! A [`RunConfig`] is resolved once per run from four layers, highest
//! precedence first: command-line overrides, scheduler properties, the
//! optional TOML run-config file, and built-in defaults. It is never mutated
//! afterwards. The product descriptor is separate and loaded lazily through
//! [`DescriptorSource`].

pub mod descriptor;
pub mod properties;
mod resolve;

pub use descriptor::{DescriptorSource, L10nSource, ProductDescriptor, UserlandSource};
pub use properties::SchedulerProperties;
pub use resolve::{resolve, FileConfig, Overrides};

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {kind} '{path}'")]
    Read {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {kind} '{path}': {message}")]
    Parse {
        kind: &'static str,
        path: PathBuf,
        message: String,
    },
    #[error("missing required setting '{0}'")]
    Missing(&'static str),
    #[error("unknown stage '{name}' (known stages: {known})")]
    UnknownStage { name: String, known: String },
    #[error("{0}")]
    Invalid(String),
}

/// Where the staged build artifacts are uploaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadConfig {
    pub remote_host: Option<String>,
    pub remote_basepath: Option<String>,
    pub ssh_user: Option<String>,
    pub ssh_key: Option<PathBuf>,
}

/// Update publishing; its presence enables the update stages on nightlies.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateConfig {
    /// Download base; the descriptor's `update_base_url` takes precedence.
    #[serde(default)]
    pub base_url: Option<String>,
    pub remote_host: String,
    pub remote_basepath: String,
    #[serde(default)]
    pub ssh_user: Option<String>,
    #[serde(default)]
    pub ssh_key: Option<PathBuf>,
    /// Also publish `update.xml`, making the update visible to devices.
    #[serde(default)]
    pub autopublish: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub work_dir: PathBuf,
    pub target: String,
    pub repo: Option<String>,
    pub branch: String,
    pub revision: Option<String>,
    pub descriptor_path: Option<PathBuf>,
    pub snapshot_url: Option<String>,
    pub ccache: bool,
    /// Relative to the userland checkout.
    pub languages_file: Option<PathBuf>,
    pub is_automation: bool,
    pub force_clobber: bool,
    pub is_nightly: bool,
    pub is_try: bool,
    pub submitter: Option<String>,
    pub tools_repo: Option<String>,
    pub upload: UploadConfig,
    pub update: Option<UpdateConfig>,
    pub signing_servers: Vec<String>,
    /// Base environment for every build command.
    pub env: BTreeMap<String, String>,
}

impl RunConfig {
    /// Nightly builds with update publishing configured produce update packages.
    pub fn publishes_updates(&self) -> bool {
        self.is_nightly && self.update.is_some()
    }
}
