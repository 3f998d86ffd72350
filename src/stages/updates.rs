use super::build::build_invocation;
use super::BuildRun;
use crate::collab::{Checkout, RemoteDestination};
use crate::fsutil::{atomic_rename, copy_path, reset_dir};
use crate::metadata::{read_build_id, read_version};
use crate::pipeline::{StageError, StageOutcome, StageResult};
use crate::publish::list_dir;
use crate::updates::{UpdateDescriptor, UPDATE_MANIFEST};
use anyhow::Context;
use tracing::info;

/// Why the update stages do nothing on this run, if they don't.
fn gate(run: &BuildRun) -> Option<StageOutcome> {
    if !run.config.is_nightly {
        Some(StageOutcome::skipped("updates are only produced by nightly builds"))
    } else if run.config.update.is_none() {
        Some(StageOutcome::skipped("update publishing is not configured"))
    } else {
        None
    }
}

pub(super) fn make_updates(run: &BuildRun) -> StageResult {
    if let Some(skip) = gate(run) {
        return Ok(skip);
    }
    let descriptor = run.descriptor()?;
    run.run_checked(build_invocation(run, &[descriptor.update_target.clone()])?)?;

    if !run.caps.signer.is_configured() {
        info!("no signing servers configured; leaving update package unsigned");
        return Ok(StageOutcome::Completed);
    }
    if let Some(tools_repo) = &run.config.tools_repo {
        let revision = run
            .caps
            .vcs
            .checkout(&Checkout::git(tools_repo, &run.paths.tools_dir))?;
        run.state.borrow_mut().tools_revision = Some(revision);
    }

    let package = &run.paths.update_package;
    let signed = run.caps.signer.sign(package)?;
    if &signed != package {
        atomic_rename(&signed, package)?;
    }
    info!(package = %package.display(), "update package signed");
    Ok(StageOutcome::Completed)
}

pub(super) fn make_update_manifest(run: &BuildRun) -> StageResult {
    if let Some(skip) = gate(run) {
        return Ok(skip);
    }
    let base_url = run
        .descriptor()?
        .update_base_url
        .clone()
        .or_else(|| run.config.update.as_ref().and_then(|u| u.base_url.clone()))
        .ok_or_else(|| {
            StageError::Config(
                "no update base url in the descriptor or run configuration".to_string(),
            )
        })?;

    let out = &run.paths.updates_upload_dir;
    reset_dir(out)?;
    let build_id = read_build_id(&run.paths.platform_ini)?;
    let version = read_version(&run.paths.application_ini)?;
    let update = UpdateDescriptor::derive(&version, &build_id, &base_url)?;

    let package = &run.paths.update_package;
    let manifest = out.join(UPDATE_MANIFEST);
    update
        .write_manifest(package, &manifest)
        .with_context(|| format!("describing update package '{}'", package.display()))?;
    copy_path(package, &out.join(&update.package_name))?;
    copy_path(&run.paths.application_ini, &out.join(&update.metadata_name))?;
    copy_path(&manifest, &out.join(&update.manifest_name))?;

    info!(build_id = %update.build_id, url = %update.url, "update manifest written");
    run.state.borrow_mut().update = Some(update);
    Ok(StageOutcome::Completed)
}

pub(super) fn upload_updates(run: &BuildRun) -> StageResult {
    if let Some(skip) = gate(run) {
        return Ok(skip);
    }
    let Some(update) = &run.config.update else {
        return Ok(StageOutcome::skipped("update publishing is not configured"));
    };
    let dest = RemoteDestination {
        host: update.remote_host.clone(),
        path: update.remote_basepath.clone(),
        user: update.ssh_user.clone(),
        key: update.ssh_key.clone(),
    };

    let items = list_dir(&run.paths.updates_upload_dir)?;
    let (manifest, payload): (Vec<_>, Vec<_>) = items
        .into_iter()
        .partition(|item| item.file_name().is_some_and(|n| n == UPDATE_MANIFEST));

    // The manifest goes last so devices never see an update before its files.
    for item in &payload {
        run.caps
            .transfer
            .transfer(item, &dest)
            .with_context(|| format!("uploading '{}' to {dest}", item.display()))?;
    }
    if !update.autopublish {
        info!("autopublish is off; {UPDATE_MANIFEST} not published");
        return Ok(StageOutcome::Completed);
    }
    for item in &manifest {
        run.caps
            .transfer
            .transfer(item, &dest)
            .with_context(|| format!("publishing '{}' to {dest}", item.display()))?;
    }
    info!(url = %dest.url(), "update published");
    Ok(StageOutcome::Completed)
}
