mod args;
mod logging;
mod run;

pub(crate) use args::Cli;
pub(crate) use logging::init as init_logging;
pub(crate) use run::{list_stages, run_build};
