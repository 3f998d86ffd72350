use clap::Parser;
use image_builder::config::Overrides;
use image_builder::StageSelection;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "image-builder", version, about = "Build an OS image through a staged pipeline")]
pub(crate) struct Cli {
    /// TOML run-config file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Scheduler properties JSON (default: $PROPERTIES_FILE).
    #[arg(long, value_name = "FILE")]
    pub properties: Option<PathBuf>,

    /// Device target to build.
    #[arg(long)]
    pub target: Option<String>,

    /// Product descriptor (default: <source>/build/config/<target>/descriptor.json).
    #[arg(long, value_name = "FILE")]
    pub descriptor: Option<PathBuf>,

    #[arg(long, value_name = "URL")]
    pub snapshot_url: Option<String>,

    #[arg(long)]
    pub disable_ccache: bool,

    /// Languages file, relative to the userland checkout.
    #[arg(long, value_name = "FILE")]
    pub languages_file: Option<PathBuf>,

    #[arg(long, value_name = "URL")]
    pub repo: Option<String>,

    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    #[arg(long)]
    pub nightly: bool,

    #[arg(long = "try")]
    pub try_build: bool,

    /// Run every stage in the catalogue.
    #[arg(long, conflicts_with = "stage")]
    pub all_stages: bool,

    /// Run only these stages (repeatable).
    #[arg(long = "stage", value_name = "STAGE")]
    pub stage: Vec<String>,

    #[arg(long = "add-stage", value_name = "STAGE")]
    pub add_stage: Vec<String>,

    #[arg(long = "skip-stage", value_name = "STAGE")]
    pub skip_stage: Vec<String>,

    /// Print the stage catalogue and exit.
    #[arg(long)]
    pub list_stages: bool,

    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    pub(crate) fn selection(&self) -> StageSelection {
        let mut selection = if self.all_stages {
            StageSelection::all()
        } else if !self.stage.is_empty() {
            StageSelection::only(self.stage.iter().cloned())
        } else {
            StageSelection::default()
        };
        selection.add = self.add_stage.clone();
        selection.skip = self.skip_stage.clone();
        selection
    }

    /// Command-line layer of the run configuration.
    pub(crate) fn overrides(&self, signing_servers: Option<Vec<String>>) -> Overrides {
        Overrides {
            work_dir: self.work_dir.clone(),
            target: self.target.clone(),
            repo: self.repo.clone(),
            descriptor: self.descriptor.clone(),
            snapshot_url: self.snapshot_url.clone(),
            disable_ccache: self.disable_ccache,
            languages_file: self.languages_file.clone(),
            nightly: self.nightly,
            try_build: self.try_build,
            signing_servers,
        }
    }
}
