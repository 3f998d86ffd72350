//! Every filesystem location a run touches, computed once from the config.

use crate::config::RunConfig;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub work_dir: PathBuf,
    pub src_dir: PathBuf,
    pub objdir: PathBuf,
    pub userland_dir: PathBuf,
    pub l10n_base_dir: PathBuf,
    pub tools_dir: PathBuf,
    pub signing_cache_dir: PathBuf,
    pub snapshot_path: PathBuf,
    pub fingerprint_path: PathBuf,
    pub product_out_dir: PathBuf,
    pub build_prop: PathBuf,
    pub platform_ini: PathBuf,
    pub application_ini: PathBuf,
    pub update_package: PathBuf,
    pub upload_dir: PathBuf,
    pub updates_upload_dir: PathBuf,
    pub log_dir: PathBuf,
    pub userconfig_path: PathBuf,
    pub descriptor_path: PathBuf,
}

impl RunPaths {
    pub fn new(config: &RunConfig) -> Self {
        let work = config.work_dir.clone();
        let src_dir = work.join("source");
        let objdir = work.join("objdir");
        let product_out_dir = work
            .join("out")
            .join("target")
            .join("product")
            .join(&config.target);
        let metadata_dir = product_out_dir.join("system").join("metadata");
        let descriptor_path = config.descriptor_path.clone().unwrap_or_else(|| {
            src_dir
                .join("build")
                .join("config")
                .join(&config.target)
                .join("descriptor.json")
        });

        Self {
            userland_dir: work.join("userland"),
            l10n_base_dir: work.join("userland-l10n"),
            tools_dir: work.join("tools"),
            signing_cache_dir: work.join("signing-cache"),
            snapshot_path: work.join("snapshot.tar.xz"),
            fingerprint_path: work.join(".snapshot_mtime"),
            build_prop: product_out_dir.join("system").join("build.prop"),
            platform_ini: metadata_dir.join("platform.ini"),
            application_ini: metadata_dir.join("application.ini"),
            update_package: objdir.join("dist").join("update").join("full-update.mar"),
            upload_dir: work.join("upload"),
            updates_upload_dir: work.join("upload-updates"),
            log_dir: work.join("logs"),
            userconfig_path: work.join(".userconfig"),
            src_dir,
            objdir,
            product_out_dir,
            descriptor_path,
            work_dir: work,
        }
    }

    /// The bundle archive produced by `prep-upload`.
    pub fn bundle_archive(&self, target: &str) -> PathBuf {
        self.work_dir.join(format!("{target}.tar.zst"))
    }

    /// Log file the binary tees one run's tracing output into.
    pub fn run_log(&self, run_id: &str) -> PathBuf {
        self.log_dir.join(format!("run-{run_id}.log"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, FileConfig, Overrides};

    fn config(descriptor: Option<&str>) -> RunConfig {
        resolve(
            Overrides {
                target: Some("device-x".to_string()),
                work_dir: Some(PathBuf::from("/w")),
                descriptor: descriptor.map(PathBuf::from),
                ..Overrides::default()
            },
            None,
            FileConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn layout_is_derived_from_work_dir_and_target() {
        let paths = RunPaths::new(&config(None));
        assert_eq!(paths.src_dir, PathBuf::from("/w/source"));
        assert_eq!(paths.fingerprint_path, PathBuf::from("/w/.snapshot_mtime"));
        assert_eq!(
            paths.platform_ini,
            PathBuf::from("/w/out/target/product/device-x/system/metadata/platform.ini")
        );
        assert_eq!(
            paths.update_package,
            PathBuf::from("/w/objdir/dist/update/full-update.mar")
        );
        assert_eq!(
            paths.descriptor_path,
            PathBuf::from("/w/source/build/config/device-x/descriptor.json")
        );
        assert_eq!(paths.bundle_archive("device-x"), PathBuf::from("/w/device-x.tar.zst"));
        assert_eq!(
            paths.build_prop,
            PathBuf::from("/w/out/target/product/device-x/system/build.prop")
        );
        assert_eq!(paths.run_log("0abc"), PathBuf::from("/w/logs/run-0abc.log"));
    }

    #[test]
    fn descriptor_override_is_used_verbatim() {
        let paths = RunPaths::new(&config(Some("/etc/device.json")));
        assert_eq!(paths.descriptor_path, PathBuf::from("/etc/device.json"));
    }
}
