//! Artifact staging and remote destination selection.
//!
//! Descriptor patterns may reference `{objdir}`, `{workdir}` and `{srcdir}`;
//! any other placeholder is rejected rather than left in the glob.

use crate::archive::{compress_file, create_tar_zst};
use crate::collab::RemoteDestination;
use crate::config::{RunConfig, UploadConfig};
use crate::fsutil::copy_path;
use crate::paths::RunPaths;
use anyhow::{anyhow, bail, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// Extension of raw disk images that are compressed before upload.
pub const IMAGE_EXTENSION: &str = "img";

/// Substitute the supported placeholders in `pattern`.
pub fn expand_pattern(pattern: &str, paths: &RunPaths) -> Result<String> {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| anyhow!("unterminated placeholder in pattern '{pattern}'"))?;
        let value = match &after[..end] {
            "objdir" => &paths.objdir,
            "workdir" => &paths.work_dir,
            "srcdir" => &paths.src_dir,
            other => bail!("unknown placeholder '{{{other}}}' in pattern '{pattern}'"),
        };
        out.push_str(&value.display().to_string());
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Ordered, de-duplicated files matched by a pattern list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    files: Vec<PathBuf>,
}

impl ArtifactSet {
    /// Expand and glob every pattern; matches keep pattern order, then glob order.
    pub fn resolve(patterns: &[String], paths: &RunPaths) -> Result<Self> {
        let mut set = Self::default();
        let mut seen = BTreeSet::new();
        for pattern in patterns {
            let expanded = expand_pattern(pattern, paths)?;
            let matches = glob::glob(&expanded)
                .with_context(|| format!("invalid artifact pattern '{expanded}'"))?;
            for entry in matches {
                let path = entry.with_context(|| format!("reading match of '{expanded}'"))?;
                if seen.insert(path.clone()) {
                    set.files.push(path);
                }
            }
        }
        Ok(set)
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

/// Copy `files` into a temporary `<dir_name>/` and archive it to `archive`.
pub fn bundle(files: &ArtifactSet, dir_name: &str, archive: &Path) -> Result<()> {
    let staging = TempDir::new().context("creating bundle staging directory")?;
    let root = staging.path().join(dir_name);
    fs::create_dir_all(&root)?;
    for file in files.files() {
        let name = file
            .file_name()
            .ok_or_else(|| anyhow!("artifact without file name: {}", file.display()))?;
        copy_path(file, &root.join(name))?;
    }
    info!(archive = %archive.display(), files = files.len(), "creating bundle");
    create_tar_zst(&root, dir_name, archive)
        .with_context(|| format!("archiving bundle to '{}'", archive.display()))
}

/// What happens to an individually uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadAction {
    Copy,
    Compress,
    Skip,
}

pub fn upload_action(file: &Path, is_nightly: bool) -> UploadAction {
    let is_image = file.extension().and_then(|e| e.to_str()) == Some(IMAGE_EXTENSION);
    match (is_image, is_nightly) {
        (false, _) => UploadAction::Copy,
        (true, true) => UploadAction::Compress,
        (true, false) => UploadAction::Skip,
    }
}

/// Place one individually uploaded file into `upload_dir`; returns the staged path.
pub fn stage_individual(
    file: &Path,
    upload_dir: &Path,
    is_nightly: bool,
) -> Result<Option<PathBuf>> {
    let name = file
        .file_name()
        .ok_or_else(|| anyhow!("artifact without file name: {}", file.display()))?;
    match upload_action(file, is_nightly) {
        UploadAction::Skip => {
            info!(file = %file.display(), "not uploading image for non-nightly build");
            Ok(None)
        }
        UploadAction::Compress => {
            let mut compressed = name.to_os_string();
            compressed.push(".zst");
            let dest = upload_dir.join(compressed);
            info!(file = %file.display(), "compressing image");
            compress_file(file, &dest)?;
            Ok(Some(dest))
        }
        UploadAction::Copy => {
            let dest = upload_dir.join(name);
            copy_path(file, &dest)?;
            Ok(Some(dest))
        }
    }
}

/// Remote directory for the build's artifacts.
///
/// Try builds are keyed by submitter and revision; scheduled builds by
/// branch, target and build id.
pub fn remote_path(config: &RunConfig, basepath: &str, build_id: Option<&str>) -> Result<String> {
    let basepath = basepath.trim_end_matches('/');
    if config.is_try {
        let submitter = config.submitter.as_deref().unwrap_or("unknown");
        let revision = config
            .revision
            .as_deref()
            .ok_or_else(|| anyhow!("try upload needs a source revision"))?;
        Ok(format!(
            "{basepath}/{submitter}-{revision}/{}-{}",
            config.branch, config.target
        ))
    } else {
        let build_id = build_id.ok_or_else(|| anyhow!("scheduled upload needs a build id"))?;
        Ok(format!(
            "{basepath}/{}-{}/{build_id}",
            config.branch, config.target
        ))
    }
}

/// Complete remote destination from the upload settings.
pub fn upload_destination(
    config: &RunConfig,
    upload: &UploadConfig,
    build_id: Option<&str>,
) -> Result<RemoteDestination> {
    let host = upload
        .remote_host
        .clone()
        .ok_or_else(|| anyhow!("upload.remote_host is not configured"))?;
    let basepath = upload
        .remote_basepath
        .as_deref()
        .ok_or_else(|| anyhow!("upload.remote_basepath is not configured"))?;
    Ok(RemoteDestination {
        host,
        path: remote_path(config, basepath, build_id)?,
        user: upload.ssh_user.clone(),
        key: upload.ssh_key.clone(),
    })
}

/// Entries of `dir`, sorted by name.
pub fn list_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("listing '{}'", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, FileConfig, Overrides};

    fn config(work: &Path, is_try: bool) -> RunConfig {
        let mut config = resolve(
            Overrides {
                target: Some("device-x".to_string()),
                work_dir: Some(work.to_path_buf()),
                try_build: is_try,
                ..Overrides::default()
            },
            None,
            FileConfig::default(),
        )
        .unwrap();
        config.branch = "main".to_string();
        config.revision = Some("abc123".to_string());
        config
    }

    #[test]
    fn placeholders_expand_to_run_paths() {
        let paths = RunPaths::new(&config(Path::new("/w"), false));
        assert_eq!(
            expand_pattern("{objdir}/dist/*.zip", &paths).unwrap(),
            "/w/objdir/dist/*.zip"
        );
        assert_eq!(
            expand_pattern("{workdir}/out/{srcdir}", &paths).unwrap(),
            "/w/out//w/source"
        );
        assert_eq!(expand_pattern("plain/*.img", &paths).unwrap(), "plain/*.img");
    }

    #[test]
    fn unknown_placeholder_is_rejected() {
        let paths = RunPaths::new(&config(Path::new("/w"), false));
        let err = expand_pattern("{homedir}/x", &paths).unwrap_err();
        assert!(err.to_string().contains("{homedir}"));
        assert!(expand_pattern("{objdir", &paths).is_err());
    }

    #[test]
    fn artifact_set_is_ordered_and_deduplicated() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        for name in ["b.img", "a.img", "notes.txt"] {
            fs::write(out.join(name), name).unwrap();
        }
        let paths = RunPaths::new(&config(dir.path(), false));
        let set = ArtifactSet::resolve(
            &[
                "{workdir}/out/notes.txt".to_string(),
                "{workdir}/out/*".to_string(),
            ],
            &paths,
        )
        .unwrap();
        assert_eq!(
            set.files(),
            &[out.join("notes.txt"), out.join("a.img"), out.join("b.img")]
        );
    }

    #[test]
    fn image_handling_depends_on_build_mode() {
        assert_eq!(upload_action(Path::new("system.img"), true), UploadAction::Compress);
        assert_eq!(upload_action(Path::new("system.img"), false), UploadAction::Skip);
        assert_eq!(upload_action(Path::new("build.prop"), false), UploadAction::Copy);
    }

    #[test]
    fn stage_individual_compresses_nightly_images() {
        let dir = tempfile::TempDir::new().unwrap();
        let img = dir.path().join("system.img");
        fs::write(&img, vec![0u8; 2048]).unwrap();
        let upload = dir.path().join("upload");
        fs::create_dir_all(&upload).unwrap();

        assert_eq!(stage_individual(&img, &upload, false).unwrap(), None);
        let staged = stage_individual(&img, &upload, true).unwrap().unwrap();
        assert_eq!(staged, upload.join("system.img.zst"));
        assert!(staged.is_file());
    }

    #[test]
    fn scheduled_path_uses_branch_target_and_build_id() {
        let config = config(Path::new("/w"), false);
        assert_eq!(
            remote_path(&config, "/pub/builds/", Some("20240101010101")).unwrap(),
            "/pub/builds/main-device-x/20240101010101"
        );
        assert!(remote_path(&config, "/pub/builds", None).is_err());
    }

    #[test]
    fn try_path_uses_submitter_and_revision() {
        let mut config = config(Path::new("/w"), true);
        assert_eq!(
            remote_path(&config, "/pub/try", Some("20240101010101")).unwrap(),
            "/pub/try/unknown-abc123/main-device-x"
        );
        config.submitter = Some("dev@example.org".to_string());
        let path = remote_path(&config, "/pub/try", None).unwrap();
        assert_eq!(path, "/pub/try/dev@example.org-abc123/main-device-x");
        assert!(!path.contains("20240101010101"));
    }

    #[test]
    fn destination_requires_host_and_basepath() {
        let config = config(Path::new("/w"), false);
        let err = upload_destination(&config, &UploadConfig::default(), Some("1")).unwrap_err();
        assert!(err.to_string().contains("remote_host"));
    }
}
