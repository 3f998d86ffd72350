use super::Signer;
use crate::exec::{CommandRunner, Invocation};
use crate::paths::RunPaths;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Submits payloads to remote signing servers with the release `signtool.py`.
///
/// The tool is taken from the tools checkout; the signed file replaces the
/// payload in place.
pub struct SignToolSigner {
    runner: Rc<dyn CommandRunner>,
    servers: Vec<String>,
    signing_dir: PathBuf,
    cache_dir: PathBuf,
    token: PathBuf,
    nonce: PathBuf,
    format: String,
}

impl SignToolSigner {
    pub fn new(runner: Rc<dyn CommandRunner>, servers: Vec<String>, paths: &RunPaths) -> Self {
        Self {
            runner,
            servers,
            signing_dir: paths.tools_dir.join("release").join("signing"),
            cache_dir: paths.signing_cache_dir.clone(),
            token: paths.work_dir.join("token"),
            nonce: paths.work_dir.join("nonce"),
            format: "mar".to_string(),
        }
    }

    fn command(&self, payload: &Path) -> Vec<String> {
        let mut argv = vec![
            "python3".to_string(),
            self.signing_dir.join("signtool.py").display().to_string(),
            "--cachedir".to_string(),
            self.cache_dir.display().to_string(),
            "-t".to_string(),
            self.token.display().to_string(),
            "-n".to_string(),
            self.nonce.display().to_string(),
            "-c".to_string(),
            self.signing_dir.join("host.cert").display().to_string(),
            "-f".to_string(),
            self.format.clone(),
        ];
        for server in &self.servers {
            argv.push("-H".to_string());
            argv.push(server.clone());
        }
        argv.push(payload.display().to_string());
        argv
    }
}

impl Signer for SignToolSigner {
    fn is_configured(&self) -> bool {
        !self.servers.is_empty()
    }

    fn sign(&self, payload: &Path) -> Result<PathBuf> {
        if !self.is_configured() {
            bail!("no signing servers configured");
        }
        if !payload.is_file() {
            bail!("signing payload '{}' does not exist", payload.display());
        }
        self.runner
            .run(&Invocation::new(self.command(payload)))?
            .check()
            .with_context(|| format!("signing '{}'", payload.display()))?;
        Ok(payload.to_path_buf())
    }
}
