use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::Path;
use std::sync::Mutex;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn filter(verbose: bool, quiet: bool) -> EnvFilter {
    let default = if verbose {
        "image_builder=debug"
    } else if quiet {
        "image_builder=error"
    } else {
        "image_builder=info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Process-wide subscriber: everything goes to stderr.
pub(crate) fn init(verbose: bool, quiet: bool) {
    tracing_subscriber::registry()
        .with(filter(verbose, quiet))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

/// Tee this thread's tracing output into `path` until the guard drops.
pub(crate) fn tee_to_file(path: &Path, verbose: bool, quiet: bool) -> Result<DefaultGuard> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory '{}'", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("creating run log '{}'", path.display()))?;
    let subscriber = tracing_subscriber::registry()
        .with(filter(verbose, quiet))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false),
        );
    Ok(subscriber.set_default())
}
