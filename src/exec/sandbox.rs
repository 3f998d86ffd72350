//! Named sandbox profiles for running build commands in isolation.

use super::{CommandRunner, Invocation};
use crate::classify::{base_rules, ClassificationRule, Severity};
use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

/// A pre-provisioned isolated environment and the packages it must contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxProfile {
    pub name: String,
    pub packages: Vec<String>,
    pub files: Vec<SandboxFile>,
}

/// A host file copied into the sandbox when it is prepared.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxFile {
    pub source: PathBuf,
    pub destination: String,
}

/// Provisions sandbox profiles and rewrites commands to run inside them.
pub trait SandboxProvider {
    /// Make sure `profile` is initialised with its package set.
    ///
    /// Provisioning commands go through `runner` so they are classified and
    /// logged like any other command.
    fn prepare(&self, profile: &SandboxProfile, runner: &dyn CommandRunner) -> Result<()>;

    /// The host command line that runs `invocation` inside `profile`.
    fn wrap(&self, profile: &SandboxProfile, invocation: &Invocation) -> Vec<String>;
}

/// `mock` chroot profiles.
#[derive(Debug, Clone)]
pub struct MockChroot {
    binary: String,
}

impl Default for MockChroot {
    fn default() -> Self {
        Self {
            binary: "mock".to_string(),
        }
    }
}

impl MockChroot {
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn base(&self, profile: &SandboxProfile) -> Vec<String> {
        vec![self.binary.clone(), "-r".to_string(), profile.name.clone()]
    }

    fn provision(&self, runner: &dyn CommandRunner, argv: Vec<String>) -> Result<()> {
        let mut rules = base_rules();
        rules.push(ClassificationRule::substr("ERROR: ", Severity::Error));
        runner.run(&Invocation::new(argv).rules(&rules))?.check()?;
        Ok(())
    }
}

impl SandboxProvider for MockChroot {
    fn prepare(&self, profile: &SandboxProfile, runner: &dyn CommandRunner) -> Result<()> {
        let mut init = self.base(profile);
        init.push("--init".to_string());
        self.provision(runner, init)?;

        if !profile.packages.is_empty() {
            let mut install = self.base(profile);
            install.push("--install".to_string());
            install.extend(profile.packages.iter().cloned());
            self.provision(runner, install)?;
        }

        for file in &profile.files {
            let mut copyin = self.base(profile);
            copyin.push("--copyin".to_string());
            copyin.push(file.source.display().to_string());
            copyin.push(file.destination.clone());
            self.provision(runner, copyin)?;
        }
        Ok(())
    }

    fn wrap(&self, profile: &SandboxProfile, invocation: &Invocation) -> Vec<String> {
        let mut script = String::new();
        for (key, value) in &invocation.env {
            script.push_str(&format!("export {}={}; ", key, shell_quote(value)));
        }
        let command = invocation
            .argv
            .iter()
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" ");
        script.push_str(&command);

        let mut argv = self.base(profile);
        if let Some(cwd) = &invocation.cwd {
            argv.push("--cwd".to_string());
            argv.push(cwd.display().to_string());
        }
        argv.push("--unpriv".to_string());
        argv.push("--shell".to_string());
        argv.push(script);
        argv
    }
}

/// Quote `value` for a POSIX shell when it contains anything unsafe.
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
