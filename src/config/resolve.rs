use super::{ConfigError, RunConfig, SchedulerProperties, UpdateConfig, UploadConfig};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_WORK_DIR: &str = "build";

/// The optional TOML run-config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub work_dir: Option<PathBuf>,
    pub target: Option<String>,
    pub repo: Option<String>,
    /// Base URL that scheduler `repo_path` values are relative to.
    pub repo_base_url: Option<String>,
    pub branch: Option<String>,
    pub descriptor: Option<PathBuf>,
    pub snapshot_url: Option<String>,
    pub ccache: Option<bool>,
    pub languages_file: Option<PathBuf>,
    #[serde(default)]
    pub is_automation: bool,
    #[serde(default)]
    pub force_clobber: bool,
    #[serde(default)]
    pub is_nightly: bool,
    #[serde(default)]
    pub is_try: bool,
    pub tools_repo: Option<String>,
    #[serde(default)]
    pub signing_servers: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub upload: UploadConfig,
    pub update: Option<UpdateConfig>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            kind: "run config",
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|err| ConfigError::Parse {
            kind: "run config",
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }
}

/// Command-line values; `None`/`false` means "not given".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub work_dir: Option<PathBuf>,
    pub target: Option<String>,
    pub repo: Option<String>,
    pub descriptor: Option<PathBuf>,
    pub snapshot_url: Option<String>,
    pub disable_ccache: bool,
    pub languages_file: Option<PathBuf>,
    pub nightly: bool,
    pub try_build: bool,
    /// Signing servers from the environment; replace the file's list.
    pub signing_servers: Option<Vec<String>>,
}

/// Merge the layers into one immutable [`RunConfig`].
pub fn resolve(
    overrides: Overrides,
    properties: Option<&SchedulerProperties>,
    file: FileConfig,
) -> Result<RunConfig, ConfigError> {
    let target = overrides
        .target
        .or(file.target)
        .ok_or(ConfigError::Missing("target"))?;
    if target.is_empty() || target.contains('/') {
        return Err(ConfigError::Invalid(format!("invalid target '{target}'")));
    }

    let props = properties.map(|p| &p.properties);
    let repo = match (overrides.repo, props.and_then(|p| p.repo_path.as_deref())) {
        (Some(repo), _) => Some(repo),
        (None, Some(repo_path)) => {
            let base = file
                .repo_base_url
                .as_deref()
                .ok_or(ConfigError::Missing("repo_base_url"))?;
            Some(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                repo_path.trim_start_matches('/')
            ))
        }
        (None, None) => file.repo,
    };

    let branch = props
        .and_then(|p| p.branch.clone())
        .or(file.branch)
        .or_else(|| repo.as_deref().and_then(repo_basename))
        .unwrap_or_else(|| "default".to_string());

    let is_nightly = overrides.nightly
        || props
            .and_then(|p| p.nightly_build)
            .unwrap_or(file.is_nightly);

    Ok(RunConfig {
        work_dir: overrides
            .work_dir
            .or(file.work_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR)),
        target,
        repo,
        branch,
        revision: properties.and_then(|p| p.revision()).map(str::to_string),
        descriptor_path: overrides.descriptor.or(file.descriptor),
        snapshot_url: overrides.snapshot_url.or(file.snapshot_url),
        ccache: !overrides.disable_ccache && file.ccache.unwrap_or(true),
        languages_file: overrides.languages_file.or(file.languages_file),
        is_automation: file.is_automation,
        force_clobber: file.force_clobber,
        is_nightly,
        is_try: overrides.try_build || file.is_try,
        submitter: properties.and_then(|p| p.submitter()).map(str::to_string),
        tools_repo: file.tools_repo,
        upload: file.upload,
        update: file.update,
        signing_servers: overrides.signing_servers.unwrap_or(file.signing_servers),
        env: file.env,
    })
}

fn repo_basename(repo: &str) -> Option<String> {
    repo.trim_end_matches('/')
        .rsplit('/')
        .next()
        .map(|name| name.trim_end_matches(".git"))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file() -> FileConfig {
        toml::from_str(
            r#"
            target = "file-target"
            repo = "https://git.example.org/file/os.git"
            repo_base_url = "https://git.example.org"
            snapshot_url = "https://cdn.example.org/file.tar.xz"
            is_nightly = false

            [upload]
            remote_host = "upload.example.org"
            remote_basepath = "/pub/builds"
            "#,
        )
        .unwrap()
    }

    fn properties() -> SchedulerProperties {
        serde_json::from_str(
            r#"{"properties": {"repo_path": "releases/main", "branch": "main",
                               "nightly_build": true},
                "sourcestamp": {"revision": "abc123", "changes": [{"who": "dev"}]}}"#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_fill_gaps() {
        let config = resolve(
            Overrides {
                target: Some("device-x".to_string()),
                ..Overrides::default()
            },
            None,
            FileConfig::default(),
        )
        .unwrap();
        assert_eq!(config.work_dir, PathBuf::from("build"));
        assert!(config.ccache);
        assert!(!config.is_nightly);
        assert!(!config.is_try);
        assert_eq!(config.branch, "default");
        assert!(config.update.is_none());
        assert!(!config.publishes_updates());
    }

    #[test]
    fn file_overrides_defaults() {
        let config = resolve(Overrides::default(), None, file()).unwrap();
        assert_eq!(config.target, "file-target");
        assert_eq!(config.repo.as_deref(), Some("https://git.example.org/file/os.git"));
        assert_eq!(config.branch, "os");
        assert_eq!(
            config.upload.remote_host.as_deref(),
            Some("upload.example.org")
        );
    }

    #[test]
    fn properties_override_file() {
        let props = properties();
        let config = resolve(Overrides::default(), Some(&props), file()).unwrap();
        assert_eq!(
            config.repo.as_deref(),
            Some("https://git.example.org/releases/main")
        );
        assert_eq!(config.branch, "main");
        assert!(config.is_nightly);
        assert_eq!(config.revision.as_deref(), Some("abc123"));
        assert_eq!(config.submitter.as_deref(), Some("dev"));
    }

    #[test]
    fn cli_overrides_properties_and_file() {
        let props = properties();
        let config = resolve(
            Overrides {
                target: Some("cli-target".to_string()),
                repo: Some("https://git.example.org/cli/os".to_string()),
                snapshot_url: Some("https://cdn.example.org/cli.tar.xz".to_string()),
                disable_ccache: true,
                signing_servers: Some(vec!["sign1:9110".to_string()]),
                ..Overrides::default()
            },
            Some(&props),
            file(),
        )
        .unwrap();
        assert_eq!(config.target, "cli-target");
        assert_eq!(config.repo.as_deref(), Some("https://git.example.org/cli/os"));
        assert_eq!(
            config.snapshot_url.as_deref(),
            Some("https://cdn.example.org/cli.tar.xz")
        );
        assert!(!config.ccache);
        assert_eq!(config.signing_servers, vec!["sign1:9110".to_string()]);
        // Properties still supply what the command line left unset.
        assert_eq!(config.branch, "main");
    }

    #[test]
    fn missing_target_is_rejected() {
        let err = resolve(Overrides::default(), None, FileConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("target")));
    }

    #[test]
    fn repo_path_needs_a_base_url() {
        let props = properties();
        let err = resolve(
            Overrides {
                target: Some("device-x".to_string()),
                ..Overrides::default()
            },
            Some(&props),
            FileConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("repo_base_url")));
    }

    #[test]
    fn update_section_enables_nightly_updates() {
        let file: FileConfig = toml::from_str(
            r#"
            target = "device-x"
            is_nightly = true
            [update]
            base_url = "https://updates.example.org/device-x/"
            remote_host = "updates.example.org"
            remote_basepath = "/srv/updates/device-x"
            autopublish = true
            "#,
        )
        .unwrap();
        let config = resolve(Overrides::default(), None, file).unwrap();
        assert!(config.publishes_updates());
        assert!(config.update.unwrap().autopublish);
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(&path, "target = \"x\"\nenable_try_uploads = true\n").unwrap();
        assert!(matches!(
            FileConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
