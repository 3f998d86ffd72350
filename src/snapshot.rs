//! Unpack-skipping cache for the prebuilt binary snapshot.
//!
//! The fingerprint is the snapshot file's modification time in whole seconds,
//! stored as a decimal integer. A re-download that keeps the same mtime but
//! changes content is not detected.

use crate::fsutil::write_atomic;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SnapshotCache {
    snapshot: PathBuf,
    fingerprint_file: PathBuf,
}

impl SnapshotCache {
    pub fn new(snapshot: impl Into<PathBuf>, fingerprint_file: impl Into<PathBuf>) -> Self {
        Self {
            snapshot: snapshot.into(),
            fingerprint_file: fingerprint_file.into(),
        }
    }

    /// True iff the recorded fingerprint matches the snapshot's current mtime.
    ///
    /// A missing or unparsable fingerprint never skips.
    pub fn should_skip_unpack(&self) -> Result<bool> {
        let current = snapshot_mtime(&self.snapshot)?;
        let Some(previous) = self.recorded()? else {
            return Ok(false);
        };
        debug!(current, previous, "comparing snapshot fingerprint");
        Ok(previous == current)
    }

    /// Persist the snapshot's current mtime after a successful unpack.
    pub fn record(&self) -> Result<u64> {
        let mtime = snapshot_mtime(&self.snapshot)?;
        info!(
            mtime,
            path = %self.fingerprint_file.display(),
            "recording snapshot fingerprint"
        );
        write_atomic(&self.fingerprint_file, mtime.to_string().as_bytes())?;
        Ok(mtime)
    }

    fn recorded(&self) -> Result<Option<u64>> {
        if !self.fingerprint_file.is_file() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.fingerprint_file).with_context(|| {
            format!(
                "reading snapshot fingerprint '{}'",
                self.fingerprint_file.display()
            )
        })?;
        Ok(raw.trim().parse().ok())
    }
}

/// Modification time of `path` in whole seconds since the epoch.
pub fn snapshot_mtime(path: &Path) -> Result<u64> {
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("reading mtime of snapshot '{}'", path.display()))?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default())
}
