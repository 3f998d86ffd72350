use super::{RemoteDestination, Transfer};
use crate::exec::{CommandRunner, Invocation};
use anyhow::{Context, Result};
use std::path::Path;
use std::rc::Rc;

/// `ssh mkdir -p` followed by `rsync -azv`.
pub struct RsyncTransfer {
    runner: Rc<dyn CommandRunner>,
}

impl RsyncTransfer {
    pub fn new(runner: Rc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

fn ssh_options(dest: &RemoteDestination) -> Vec<String> {
    let mut opts = Vec::new();
    if let Some(key) = &dest.key {
        opts.push("-i".to_string());
        opts.push(key.display().to_string());
    }
    if let Some(user) = &dest.user {
        opts.push("-l".to_string());
        opts.push(user.clone());
    }
    opts
}

impl Transfer for RsyncTransfer {
    fn transfer(&self, local: &Path, dest: &RemoteDestination) -> Result<()> {
        let mut mkdir = vec!["ssh".to_string()];
        mkdir.extend(ssh_options(dest));
        mkdir.extend([dest.host.clone(), "mkdir".to_string(), "-p".to_string(), dest.path.clone()]);
        self.runner
            .run(&Invocation::new(mkdir))?
            .check()
            .with_context(|| format!("creating remote directory {dest}"))?;

        let mut rsync = vec!["rsync".to_string(), "-azv".to_string()];
        let ssh = ssh_options(dest);
        if !ssh.is_empty() {
            rsync.push("-e".to_string());
            rsync.push(format!("ssh {}", ssh.join(" ")));
        }
        rsync.push(local.display().to_string());
        rsync.push(format!("{}/", dest));
        self.runner
            .run(&Invocation::new(rsync))?
            .check()
            .with_context(|| format!("transferring {} to {dest}", local.display()))?;
        Ok(())
    }
}
