use super::BuildRun;
use crate::classify::{base_rules, build_rules};
use crate::config::ProductDescriptor;
use crate::exec::Invocation;
use crate::fsutil::write_atomic;
use crate::pipeline::{StageError, StageOutcome, StageResult};
use std::collections::BTreeMap;
use tracing::info;

/// Environment every invocation of the descriptor's build command sees.
fn build_env(run: &BuildRun, descriptor: &ProductDescriptor) -> BTreeMap<String, String> {
    let mut env = run.config.env.clone();
    env.extend(descriptor.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    if let Some(languages_file) = &run.config.languages_file {
        env.insert(
            "LOCALE_BASEDIR".to_string(),
            run.paths.l10n_base_dir.display().to_string(),
        );
        env.insert(
            "LOCALES_FILE".to_string(),
            run.paths.userland_dir.join(languages_file).display().to_string(),
        );
    }
    if run.config.ccache {
        env.insert(
            "CCACHE_BASEDIR".to_string(),
            run.paths.work_dir.display().to_string(),
        );
    }
    env
}

/// The descriptor's build command with `targets` appended, ready to run.
pub(super) fn build_invocation(
    run: &BuildRun,
    targets: &[String],
) -> Result<Invocation, StageError> {
    let descriptor = run.descriptor()?;
    let mut argv: Vec<String> = descriptor
        .build_command
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if argv.is_empty() {
        return Err(StageError::Config("descriptor build_command is empty".to_string()));
    }
    argv.extend(targets.iter().cloned());

    let rules = build_rules()?;
    let sandbox = descriptor.sandbox();
    Ok(Invocation::new(argv)
        .cwd(&run.paths.work_dir)
        .env(&build_env(run, descriptor))
        .rules(&rules)
        .sandbox(sandbox.as_ref()))
}

/// `ccache` runs where the build runs, so the stats belong to that cache.
fn ccache_stats(
    run: &BuildRun,
    descriptor: &ProductDescriptor,
    flag: &str,
) -> Result<(), StageError> {
    if !run.config.ccache {
        return Ok(());
    }
    let sandbox = descriptor.sandbox();
    run.run_checked(
        Invocation::new(["ccache", flag])
            .cwd(&run.paths.work_dir)
            .rules(&base_rules())
            .sandbox(sandbox.as_ref())
            .tolerant(),
    )?;
    Ok(())
}

pub(super) fn build(run: &BuildRun) -> StageResult {
    let descriptor = run.descriptor()?;
    let userconfig = format!("OBJDIR={}\n", run.paths.objdir.display());
    write_atomic(&run.paths.userconfig_path, userconfig.as_bytes())?;

    ccache_stats(run, descriptor, "-z")?;
    run.run_checked(build_invocation(run, &descriptor.build_targets)?)?;
    ccache_stats(run, descriptor, "-s")?;
    Ok(StageOutcome::Completed)
}

pub(super) fn build_symbols(run: &BuildRun) -> StageResult {
    let descriptor = run.descriptor()?;
    if descriptor.config_version < 1 {
        return Ok(StageOutcome::skipped(format!(
            "descriptor config_version {} does not support symbols",
            descriptor.config_version
        )));
    }
    run.run_checked(build_invocation(run, &["buildsymbols".to_string()])?)?;
    if run.config.is_nightly {
        run.run_checked(build_invocation(run, &["uploadsymbols".to_string()])?)?;
    } else {
        info!("not uploading symbols for a non-nightly build");
    }
    Ok(StageOutcome::Completed)
}
