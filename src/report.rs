//! JSON record of one pipeline run, written into the run's log directory.

use crate::fsutil::write_json_atomic;
use crate::pipeline::{RunStatus, RunSummary};
use crate::stages::RunState;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use time::OffsetDateTime;

const RUN_ID_SALT_BITS: u32 = 32;
static RUN_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Sortable, compact run identifier: time, pid and a sequence in base62.
pub fn generate_run_id() -> Result<String> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before UNIX_EPOCH while generating run id")?
        .as_nanos();
    let pid_component = (std::process::id() as u128) << (RUN_ID_SALT_BITS - 16);
    let seq_component = (RUN_ID_COUNTER.fetch_add(1, Ordering::Relaxed) as u128) & 0xFFFF;
    let entropy = (nanos << RUN_ID_SALT_BITS) | pid_component | seq_component;
    let id = base62_encode_u128(entropy);
    if id.len() > 22 {
        bail!("run id overflow while generating run identifier");
    }
    Ok(id)
}

fn base62_encode_u128(mut value: u128) -> String {
    const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut bytes = Vec::new();
    while value > 0 {
        bytes.push(ALPHABET[(value % 62) as usize] as char);
        value /= 62;
    }
    bytes.iter().rev().collect()
}

/// `YYYYMMDDTHHMMSSZ` in UTC.
pub fn now_utc_compact() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub name: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub target: String,
    pub status: String,
    pub created_at_utc: String,
    pub finished_at_utc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userland_revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_url: Option<String>,
    pub stages: Vec<StageReport>,
}

impl RunReport {
    pub fn new(
        run_id: &str,
        target: &str,
        created_at_utc: String,
        summary: &RunSummary,
        state: &RunState,
    ) -> Self {
        let stages = summary
            .records
            .iter()
            .map(|record| StageReport {
                name: record.name.to_string(),
                outcome: record.status.label().to_string(),
                detail: record.status.detail().map(str::to_string),
                lines: record.status.lines().to_vec(),
            })
            .collect();
        Self {
            run_id: run_id.to_string(),
            target: target.to_string(),
            status: summary.status().to_string(),
            created_at_utc,
            finished_at_utc: now_utc_compact(),
            revision: state.revision.clone(),
            userland_revision: state.userland_revision.clone(),
            update_url: state.update.as_ref().map(|u| u.url.clone()),
            stages,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Success.to_string()
    }

    /// Persist as `<log_dir>/run-<run_id>.json`; returns the written path.
    pub fn write(&self, log_dir: &Path) -> Result<PathBuf> {
        let path = log_dir.join(format!("run-{}.json", self.run_id));
        write_json_atomic(&path, self)
            .with_context(|| format!("writing run report '{}'", path.display()))?;
        Ok(path)
    }
}
