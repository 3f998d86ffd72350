//! The product descriptor: per-target build parameters shipped with the source.

use super::ConfigError;
use crate::exec::sandbox::{SandboxFile, SandboxProfile};
use serde::Deserialize;
use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

fn default_build_command() -> String {
    "./build.sh".to_string()
}

fn default_bundle_dir_name() -> String {
    "distro".to_string()
}

fn default_update_target() -> String {
    "update-full".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProductDescriptor {
    #[serde(default = "default_build_command")]
    pub build_command: String,
    #[serde(default)]
    pub build_targets: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Patterns archived together into `<target>.tar.zst`.
    #[serde(default)]
    pub bundle_files: Vec<String>,
    /// Patterns uploaded individually.
    #[serde(default)]
    pub upload_files: Vec<String>,
    #[serde(default = "default_bundle_dir_name")]
    pub bundle_dir_name: String,
    #[serde(default)]
    pub sandbox_profile: Option<String>,
    #[serde(default)]
    pub sandbox_packages: Vec<String>,
    #[serde(default)]
    pub sandbox_files: Vec<SandboxFile>,
    #[serde(default)]
    pub snapshot_url: Option<String>,
    /// Fetch manifest, relative to the descriptor's directory.
    #[serde(default)]
    pub snapshot_manifest: Option<String>,
    #[serde(default)]
    pub userland: Option<UserlandSource>,
    #[serde(default)]
    pub update_base_url: Option<String>,
    #[serde(default = "default_update_target")]
    pub update_target: String,
    #[serde(default)]
    pub config_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserlandSource {
    pub repo: String,
    #[serde(default = "default_vcs")]
    pub vcs: String,
    #[serde(default)]
    pub l10n: Option<L10nSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct L10nSource {
    /// Base URL; each locale lives at `<root>/<locale>`.
    pub root: String,
    #[serde(default = "default_vcs")]
    pub vcs: String,
}

fn default_vcs() -> String {
    "git".to_string()
}

impl ProductDescriptor {
    pub fn parse(path: &Path, raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|err| ConfigError::Parse {
            kind: "product descriptor",
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    /// The sandbox profile commands run in, if the descriptor names one.
    pub fn sandbox(&self) -> Option<SandboxProfile> {
        self.sandbox_profile.as_ref().map(|name| SandboxProfile {
            name: name.clone(),
            packages: self.sandbox_packages.clone(),
            files: self.sandbox_files.clone(),
        })
    }
}

/// Loads the descriptor on first access and hands out the same value after.
#[derive(Debug)]
pub struct DescriptorSource {
    path: PathBuf,
    loaded: OnceCell<ProductDescriptor>,
}

impl DescriptorSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            loaded: OnceCell::new(),
        }
    }

    /// A source that is already resolved; nothing is read from disk.
    pub fn preloaded(path: impl Into<PathBuf>, descriptor: ProductDescriptor) -> Self {
        let source = Self::new(path);
        let _ = source.loaded.set(descriptor);
        source
    }

    /// Directory the descriptor lives in; relative references resolve here.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }

    pub fn get(&self) -> Result<&ProductDescriptor, ConfigError> {
        if let Some(descriptor) = self.loaded.get() {
            return Ok(descriptor);
        }
        info!(path = %self.path.display(), "loading product descriptor");
        let raw = fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            kind: "product descriptor",
            path: self.path.clone(),
            source,
        })?;
        let descriptor = ProductDescriptor::parse(&self.path, &raw)?;
        Ok(self.loaded.get_or_init(|| descriptor))
    }
}
