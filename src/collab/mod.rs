//! Capabilities the pipeline delegates to: version control, downloads,
//! remote transfer and signing.
//!
//! Each capability is a trait with one process-backed implementation that
//! spawns through the shared [`CommandRunner`].

mod fetch;
mod signing;
mod transfer;
mod vcs;

pub use fetch::{CurlFetcher, ManifestEntry};
pub use signing::SignToolSigner;
pub use transfer::RsyncTransfer;
pub use vcs::GitCheckout;

use crate::config::RunConfig;
use crate::exec::CommandRunner;
use crate::paths::RunPaths;
use anyhow::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// A source checkout request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub repo: String,
    pub dest: PathBuf,
    /// `None` checks out the repository's default head.
    pub revision: Option<String>,
    pub vcs: String,
}

impl Checkout {
    pub fn git(repo: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            dest: dest.into(),
            revision: None,
            vcs: "git".to_string(),
        }
    }

    pub fn at(mut self, revision: Option<&str>) -> Self {
        self.revision = revision.map(str::to_string);
        self
    }

    pub fn with_vcs(mut self, vcs: &str) -> Self {
        self.vcs = vcs.to_string();
        self
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait VersionControl {
    /// Fetch the source into `request.dest` and return the resolved revision.
    fn checkout(&self, request: &Checkout) -> Result<String>;
}

#[cfg_attr(test, mockall::automock)]
pub trait Fetcher {
    fn download(&self, url: &str, dest: &Path) -> Result<()>;

    /// Fetch every file a manifest describes into `dest_dir`.
    fn fetch_manifest(&self, manifest: &Path, dest_dir: &Path) -> Result<()>;
}

/// A remote directory reachable over ssh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDestination {
    pub host: String,
    pub path: String,
    pub user: Option<String>,
    pub key: Option<PathBuf>,
}

impl RemoteDestination {
    /// Public URL of the destination directory.
    pub fn url(&self) -> String {
        format!("http://{}/{}", self.host, self.path.trim_start_matches('/'))
    }
}

impl fmt::Display for RemoteDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user {
            Some(user) => write!(f, "{}@{}:{}", user, self.host, self.path),
            None => write!(f, "{}:{}", self.host, self.path),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Transfer {
    /// Copy `local` (file or directory) into the remote directory.
    fn transfer(&self, local: &Path, dest: &RemoteDestination) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
pub trait Signer {
    /// Whether signing credentials are available for this run.
    fn is_configured(&self) -> bool;

    /// Sign `payload` and return the path of the signed artifact.
    fn sign(&self, payload: &Path) -> Result<PathBuf>;
}

/// Everything a stage may call out to.
pub struct Capabilities {
    pub runner: Rc<dyn CommandRunner>,
    pub vcs: Box<dyn VersionControl>,
    pub fetcher: Box<dyn Fetcher>,
    pub transfer: Box<dyn Transfer>,
    pub signer: Box<dyn Signer>,
}

impl Capabilities {
    /// Process-backed collaborators sharing `runner`.
    pub fn process_backed(
        runner: Rc<dyn CommandRunner>,
        config: &RunConfig,
        paths: &RunPaths,
    ) -> Self {
        Self {
            vcs: Box::new(GitCheckout::new(runner.clone())),
            fetcher: Box::new(CurlFetcher::new(runner.clone())),
            transfer: Box::new(RsyncTransfer::new(runner.clone())),
            signer: Box::new(SignToolSigner::new(
                runner.clone(),
                config.signing_servers.clone(),
                paths,
            )),
            runner,
        }
    }
}
