use super::Fetcher;
use crate::exec::{CommandRunner, Invocation};
use crate::fsutil::digest_file;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use sha2::Sha512;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use tracing::info;

/// One file listed in a fetch manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestEntry {
    pub filename: String,
    pub url: String,
    /// Expected SHA-512, hex encoded.
    #[serde(default)]
    pub sha512: Option<String>,
}

/// Downloads with `curl`.
pub struct CurlFetcher {
    runner: Rc<dyn CommandRunner>,
}

impl CurlFetcher {
    pub fn new(runner: Rc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl Fetcher for CurlFetcher {
    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let dest_str = dest.display().to_string();
        info!(url, dest = %dest_str, "downloading");
        self.runner
            .run(&Invocation::new(["curl", "-fL", "-o", dest_str.as_str(), url]))?
            .check()
            .with_context(|| format!("downloading {url}"))?;
        Ok(())
    }

    fn fetch_manifest(&self, manifest: &Path, dest_dir: &Path) -> Result<()> {
        let raw = fs::read_to_string(manifest)
            .with_context(|| format!("reading fetch manifest '{}'", manifest.display()))?;
        let entries: Vec<ManifestEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing fetch manifest '{}'", manifest.display()))?;

        for entry in &entries {
            if entry.filename.contains('/') {
                bail!("manifest filename '{}' must be a bare name", entry.filename);
            }
            let dest = dest_dir.join(&entry.filename);
            self.download(&entry.url, &dest)?;
            if let Some(expected) = &entry.sha512 {
                let (actual, _) = digest_file::<Sha512>(&dest)?;
                if !actual.eq_ignore_ascii_case(expected) {
                    bail!(
                        "checksum mismatch for '{}': expected {}, got {}",
                        entry.filename,
                        expected,
                        actual
                    );
                }
            }
        }
        Ok(())
    }
}
