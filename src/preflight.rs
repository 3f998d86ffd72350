//! Host tool checks run before the first stage.
//!
//! A missing tool is reported up front, with the package that provides it,
//! instead of surfacing as a spawn failure halfway through a build.

use crate::config::{ProductDescriptor, RunConfig};
use crate::stages::{
    BUILD, CHECKOUT_LOCALES, CHECKOUT_SOURCE, CHECKOUT_USERLAND, FETCH_SNAPSHOT, MAKE_UPDATES,
    UNPACK_SNAPSHOT, UPLOAD, UPLOAD_UPDATES,
};
use anyhow::{bail, Result};

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Check that specific tools are available.
///
/// Each tuple is (command_name, package_name).
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Tools the selected stages will spawn on the host, in first-use order.
///
/// `descriptor` is the product descriptor when it is already on disk. Host
/// `ccache` is only required once it is known the build runs unsandboxed;
/// the stats calls are tolerant either way.
pub fn required_tools(
    selected: &[&str],
    config: &RunConfig,
    descriptor: Option<&ProductDescriptor>,
) -> Vec<(&'static str, &'static str)> {
    let mut tools = Vec::new();
    let mut need = |tool: (&'static str, &'static str)| {
        if !tools.contains(&tool) {
            tools.push(tool);
        }
    };
    let updates = config.publishes_updates();
    let host_build = descriptor.is_some_and(|d| d.sandbox_profile.is_none());

    for stage in selected {
        match *stage {
            CHECKOUT_SOURCE | CHECKOUT_USERLAND | CHECKOUT_LOCALES => need(("git", "git")),
            FETCH_SNAPSHOT => need(("curl", "curl")),
            UNPACK_SNAPSHOT => {
                need(("tar", "tar"));
                need(("xz", "xz"));
            }
            BUILD if config.ccache && host_build => need(("ccache", "ccache")),
            MAKE_UPDATES if updates && !config.signing_servers.is_empty() => {
                need(("python3", "python3"));
                if config.tools_repo.is_some() {
                    need(("git", "git"));
                }
            }
            UPLOAD => {
                need(("ssh", "openssh-clients"));
                need(("rsync", "rsync"));
            }
            UPLOAD_UPDATES if updates => {
                need(("ssh", "openssh-clients"));
                need(("rsync", "rsync"));
            }
            _ => {}
        }
    }
    tools
}
