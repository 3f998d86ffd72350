//! The image build stage catalogue and the run context stages operate on.

mod build;
mod checkout;
mod snapshot;
mod updates;
mod upload;

use crate::collab::Capabilities;
use crate::config::{DescriptorSource, ProductDescriptor, RunConfig};
use crate::exec::{ExecutionOutcome, Invocation};
use crate::paths::RunPaths;
use crate::pipeline::{Pipeline, Stage, StageError};
use crate::updates::UpdateDescriptor;
use anyhow::Result;
use std::cell::RefCell;
use std::path::PathBuf;

/// Values stages record for later stages and the run report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    pub revision: Option<String>,
    pub userland_revision: Option<String>,
    pub tools_revision: Option<String>,
    pub update: Option<UpdateDescriptor>,
}

/// Everything one run of the image build pipeline needs.
pub struct BuildRun {
    pub config: RunConfig,
    pub paths: RunPaths,
    pub descriptor: DescriptorSource,
    pub caps: Capabilities,
    pub state: RefCell<RunState>,
    /// This run's log file, shipped by `prep-upload` when present.
    pub run_log: Option<PathBuf>,
}

impl BuildRun {
    pub fn new(config: RunConfig, caps: Capabilities) -> Self {
        let paths = RunPaths::new(&config);
        let descriptor = DescriptorSource::new(paths.descriptor_path.clone());
        Self {
            config,
            paths,
            descriptor,
            caps,
            state: RefCell::new(RunState::default()),
            run_log: None,
        }
    }

    /// A run whose descriptor is already known instead of read from disk.
    pub fn with_descriptor(
        config: RunConfig,
        caps: Capabilities,
        descriptor: ProductDescriptor,
    ) -> Self {
        let mut run = Self::new(config, caps);
        run.descriptor = DescriptorSource::preloaded(run.paths.descriptor_path.clone(), descriptor);
        run
    }

    pub fn with_run_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.run_log = Some(path.into());
        self
    }

    pub fn descriptor(&self) -> Result<&ProductDescriptor, StageError> {
        Ok(self.descriptor.get()?)
    }

    /// Run `invocation` and turn a failed outcome into a fatal stage error.
    pub(crate) fn run_checked(
        &self,
        invocation: Invocation,
    ) -> Result<ExecutionOutcome, StageError> {
        Ok(self.caps.runner.run(&invocation)?.check()?)
    }
}

pub const CLOBBER: &str = "clobber";
pub const CHECKOUT_SOURCE: &str = "checkout-source";
pub const FETCH_SNAPSHOT: &str = "fetch-snapshot";
pub const UNPACK_SNAPSHOT: &str = "unpack-snapshot";
pub const CHECKOUT_USERLAND: &str = "checkout-userland";
pub const CHECKOUT_LOCALES: &str = "checkout-locales";
pub const BUILD: &str = "build";
pub const BUILD_SYMBOLS: &str = "build-symbols";
pub const MAKE_UPDATES: &str = "make-updates";
pub const PREP_UPLOAD: &str = "prep-upload";
pub const UPLOAD: &str = "upload";
pub const MAKE_UPDATE_MANIFEST: &str = "make-update-manifest";
pub const UPLOAD_UPDATES: &str = "upload-updates";

pub fn catalogue() -> Vec<Stage<BuildRun>> {
    vec![
        Stage::new(CLOBBER, checkout::clobber),
        Stage::new(CHECKOUT_SOURCE, checkout::checkout_source).by_default(),
        Stage::new(FETCH_SNAPSHOT, snapshot::fetch_snapshot).by_default(),
        Stage::new(UNPACK_SNAPSHOT, snapshot::unpack_snapshot).by_default(),
        Stage::new(CHECKOUT_USERLAND, checkout::checkout_userland),
        Stage::new(CHECKOUT_LOCALES, checkout::checkout_locales),
        Stage::new(BUILD, build::build).by_default(),
        Stage::new(BUILD_SYMBOLS, build::build_symbols),
        Stage::new(MAKE_UPDATES, updates::make_updates),
        Stage::new(PREP_UPLOAD, upload::prep_upload),
        Stage::new(UPLOAD, upload::upload),
        Stage::new(MAKE_UPDATE_MANIFEST, updates::make_update_manifest),
        Stage::new(UPLOAD_UPDATES, updates::upload_updates),
    ]
}

pub fn pipeline() -> Result<Pipeline<BuildRun>> {
    Pipeline::new(catalogue())
}
