use super::args::Cli;
use super::logging;
use anyhow::{Context, Result};
use image_builder::collab::Capabilities;
use image_builder::config::{resolve, DescriptorSource, FileConfig, SchedulerProperties};
use image_builder::exec::sandbox::MockChroot;
use image_builder::fsutil::WorkDirLock;
use image_builder::paths::RunPaths;
use image_builder::pipeline::StageStatus;
use image_builder::preflight::{check_required_tools, required_tools};
use image_builder::report::{generate_run_id, now_utc_compact, RunReport};
use image_builder::stages::{self, BuildRun};
use image_builder::{RunConfig, RunStatus, SandboxedExecutor};
use std::env;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{info, warn};

const PROPERTIES_ENV: &str = "PROPERTIES_FILE";
const SIGNING_SERVERS_ENV: &str = "SIGNING_SERVERS";

pub(crate) fn list_stages() -> Result<()> {
    let pipeline = stages::pipeline()?;
    let defaults = pipeline.default_names();
    for name in pipeline.names() {
        let marker = if defaults.contains(&name) { "*" } else { " " };
        println!("{marker} {name}");
    }
    Ok(())
}

fn signing_servers_from_env() -> Option<Vec<String>> {
    let raw = env::var(SIGNING_SERVERS_ENV).ok()?;
    let servers: Vec<String> = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (!servers.is_empty()).then_some(servers)
}

fn resolve_config(cli: &Cli) -> Result<RunConfig> {
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let properties_path = cli
        .properties
        .clone()
        .or_else(|| env::var_os(PROPERTIES_ENV).map(PathBuf::from));
    let properties = properties_path
        .as_deref()
        .map(SchedulerProperties::load)
        .transpose()?;

    let mut config = resolve(
        cli.overrides(signing_servers_from_env()),
        properties.as_ref(),
        file,
    )?;
    if config.work_dir.is_relative() {
        let cwd = env::current_dir().context("resolving current directory")?;
        config.work_dir = cwd.join(&config.work_dir);
    }
    Ok(config)
}

/// Resolve, lock, preflight and run the selected stages.
///
/// An `Err` means no stage ran; stage failures are in the returned status.
pub(crate) fn run_build(cli: &Cli) -> Result<RunStatus> {
    let created_at = now_utc_compact();
    let run_id = generate_run_id()?;
    let config = resolve_config(cli)?;
    let pipeline = stages::pipeline()?;
    let selection = cli.selection();
    let selected = pipeline.select(&selection)?;

    std::fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("creating work directory '{}'", config.work_dir.display()))?;
    let _lock = WorkDirLock::acquire(&config.work_dir)?;
    let paths = RunPaths::new(&config);
    // The descriptor is only on disk once the source has been checked out.
    let on_disk = DescriptorSource::new(paths.descriptor_path.clone());
    check_required_tools(&required_tools(&selected, &config, on_disk.get().ok()))?;

    let run_log = paths.run_log(&run_id);
    let _log_guard = logging::tee_to_file(&run_log, cli.verbose, cli.quiet)?;

    info!(
        run_id = %run_id,
        target = %config.target,
        work_dir = %config.work_dir.display(),
        nightly = config.is_nightly,
        try_build = config.is_try,
        "starting image build"
    );

    let runner = Rc::new(SandboxedExecutor::new(Box::new(MockChroot::default())));
    let caps = Capabilities::process_backed(runner, &config, &paths);
    let target = config.target.clone();
    let run = BuildRun::new(config, caps).with_run_log(run_log);
    let summary = pipeline.run(&run, &selection)?;

    let report = RunReport::new(&run_id, &target, created_at, &summary, &run.state.borrow());
    match report.write(&run.paths.log_dir) {
        Ok(path) => info!(report = %path.display(), "run report written"),
        Err(err) => warn!("could not write run report: {err:#}"),
    }

    let status = summary.status();
    if let Some(failed) = summary.failed() {
        eprintln!("stage '{}' failed", failed.name);
        if let StageStatus::Failed { reason, lines } = &failed.status {
            eprintln!("  {reason}");
            for line in lines {
                eprintln!("    {line}");
            }
        }
    }
    info!(%status, stages = summary.records.len(), "image build finished");
    Ok(status)
}
