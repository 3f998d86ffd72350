use super::BuildRun;
use crate::classify::base_rules;
use crate::exec::Invocation;
use crate::fsutil::atomic_rename;
use crate::pipeline::{StageError, StageOutcome, StageResult};
use crate::snapshot::SnapshotCache;
use anyhow::Context;
use std::fs;
use tracing::info;

/// Listing of the repositories the snapshot was built from, if shipped.
const SNAPSHOT_SOURCES: &str = "sources.xml";

pub(super) fn fetch_snapshot(run: &BuildRun) -> StageResult {
    let url = match &run.config.snapshot_url {
        Some(url) => url.clone(),
        None => {
            let descriptor = run.descriptor()?;
            if let Some(manifest) = &descriptor.snapshot_manifest {
                let manifest = run.descriptor.dir().join(manifest);
                info!(manifest = %manifest.display(), "fetching snapshot from manifest");
                run.caps
                    .fetcher
                    .fetch_manifest(&manifest, &run.paths.work_dir)?;
                return Ok(StageOutcome::Completed);
            }
            descriptor.snapshot_url.clone().ok_or_else(|| {
                StageError::Config("no snapshot url or manifest configured".to_string())
            })?
        }
    };

    let snapshot = &run.paths.snapshot_path;
    if snapshot.exists() {
        return Ok(StageOutcome::skipped(format!(
            "local copy of {url} already present"
        )));
    }

    // A partial download must never be mistaken for a complete snapshot.
    let partial = snapshot.with_extension("xz.part");
    run.caps.fetcher.download(&url, &partial)?;
    atomic_rename(&partial, snapshot)?;
    Ok(StageOutcome::Completed)
}

pub(super) fn unpack_snapshot(run: &BuildRun) -> StageResult {
    let cache = SnapshotCache::new(&run.paths.snapshot_path, &run.paths.fingerprint_path);
    if cache.should_skip_unpack()? {
        return Ok(StageOutcome::skipped("snapshot already unpacked"));
    }

    let snapshot = run.paths.snapshot_path.display().to_string();
    run.run_checked(
        Invocation::new(["tar", "xf", snapshot.as_str(), "--strip-components", "1"])
            .cwd(&run.paths.work_dir)
            .rules(&base_rules()),
    )?;

    let sources = run.paths.work_dir.join(SNAPSHOT_SOURCES);
    if sources.is_file() {
        let listing = fs::read_to_string(&sources)
            .with_context(|| format!("reading '{}'", sources.display()))?;
        info!("snapshot sources:\n{listing}");
    }

    cache.record()?;
    Ok(StageOutcome::Completed)
}
