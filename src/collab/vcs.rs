use super::{Checkout, VersionControl};
use crate::exec::{CommandRunner, Invocation};
use anyhow::{anyhow, bail, Context, Result};
use std::fs;
use std::rc::Rc;
use tracing::info;

/// Checks out git repositories through the command runner.
pub struct GitCheckout {
    runner: Rc<dyn CommandRunner>,
}

impl GitCheckout {
    pub fn new(runner: Rc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn git(&self, args: &[&str]) -> Result<Vec<String>> {
        let mut argv = vec!["git"];
        argv.extend_from_slice(args);
        let outcome = self.runner.run(&Invocation::new(argv).capture())?.check()?;
        Ok(outcome.output)
    }
}

impl VersionControl for GitCheckout {
    fn checkout(&self, request: &Checkout) -> Result<String> {
        if request.vcs != "git" {
            bail!("unsupported version control '{}' for {}", request.vcs, request.repo);
        }
        let dest = request.dest.display().to_string();

        if request.dest.join(".git").is_dir() {
            info!(repo = %request.repo, dest = %dest, "updating existing checkout");
            self.git(&["-C", &dest, "fetch", &request.repo])?;
            if request.revision.is_none() {
                self.git(&["-C", &dest, "checkout", "--force", "FETCH_HEAD"])?;
            }
        } else {
            if let Some(parent) = request.dest.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("creating checkout parent '{}'", parent.display())
                })?;
            }
            info!(repo = %request.repo, dest = %dest, "cloning");
            self.git(&["clone", &request.repo, &dest])?;
        }

        if let Some(revision) = &request.revision {
            self.git(&["-C", &dest, "checkout", "--force", revision])?;
        }

        let output = self.git(&["-C", &dest, "rev-parse", "HEAD"])?;
        output
            .iter()
            .map(|line| line.trim())
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("git rev-parse printed no revision for {dest}"))
    }
}
