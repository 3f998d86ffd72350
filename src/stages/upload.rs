use super::BuildRun;
use crate::fsutil::{copy_path, reset_dir};
use crate::metadata::read_build_id;
use crate::pipeline::{StageError, StageOutcome, StageResult};
use crate::publish::{bundle, list_dir, stage_individual, upload_destination, ArtifactSet};
use tracing::{info, warn};

pub(super) fn prep_upload(run: &BuildRun) -> StageResult {
    let descriptor = run.descriptor()?;
    let upload_dir = &run.paths.upload_dir;
    reset_dir(upload_dir)?;

    let bundled = ArtifactSet::resolve(&descriptor.bundle_files, &run.paths)?;
    if bundled.is_empty() {
        info!("no bundle files matched; skipping bundle archive");
    } else {
        let archive = run.paths.bundle_archive(&run.config.target);
        bundle(&bundled, &descriptor.bundle_dir_name, &archive)?;
        if let Some(name) = archive.file_name() {
            copy_path(&archive, &upload_dir.join(name))?;
        }
    }

    let individual = ArtifactSet::resolve(&descriptor.upload_files, &run.paths)?;
    for file in individual.files() {
        stage_individual(file, upload_dir, run.config.is_nightly)?;
    }
    if run.paths.build_prop.is_file() {
        stage_individual(&run.paths.build_prop, upload_dir, run.config.is_nightly)?;
    }

    // Only this run's log; earlier runs in the same work dir stay behind.
    if let Some(log) = run.run_log.as_deref().filter(|log| log.is_file()) {
        if let Some(name) = log.file_name() {
            copy_path(log, &upload_dir.join("logs").join(name))?;
        }
    }
    Ok(StageOutcome::Completed)
}

pub(super) fn upload(run: &BuildRun) -> StageResult {
    let build_id = if run.config.is_try {
        None
    } else {
        Some(read_build_id(&run.paths.platform_ini)?)
    };

    let mut config = run.config.clone();
    if config.revision.is_none() {
        config.revision = run.state.borrow().revision.clone();
    }
    let dest = upload_destination(&config, &run.config.upload, build_id.as_deref())
        .map_err(|err| StageError::Config(format!("{err:#}")))?;

    let items = list_dir(&run.paths.upload_dir)?;
    if items.is_empty() {
        return Ok(StageOutcome::skipped("nothing staged for upload"));
    }

    let mut failed = 0;
    for item in &items {
        if let Err(err) = run.caps.transfer.transfer(item, &dest) {
            warn!(item = %item.display(), %dest, "transfer failed: {err:#}");
            failed += 1;
        }
    }
    if failed > 0 {
        return Ok(StageOutcome::degraded(format!(
            "{failed} of {} uploads to {dest} failed",
            items.len()
        )));
    }
    info!(url = %dest.url(), "uploaded build artifacts");
    Ok(StageOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{Capabilities, MockTransfer};
    use crate::config::UploadConfig;
    use crate::exec::testing::RecordingRunner;
    use crate::stages::fixtures::{caps, config, descriptor};
    use std::fs;
    use std::path::Path;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn write_outputs(work: &Path) {
        let out = work.join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("boot.img"), vec![1u8; 512]).unwrap();
        fs::write(out.join("kernel"), b"kernel").unwrap();
        let system = work.join("out/target/product/device-x/system");
        fs::create_dir_all(&system).unwrap();
        fs::write(system.join("build.prop"), b"ro.build=1").unwrap();
        fs::create_dir_all(work.join("logs")).unwrap();
        fs::write(work.join("logs/run-current.log"), b"starting image build").unwrap();
    }

    const DESCRIPTOR: &str = r#"{
        "bundle_files": ["{workdir}/out/kernel"],
        "upload_files": ["{workdir}/out/*.img"]
    }"#;

    fn names(dir: &Path) -> Vec<String> {
        list_dir(dir)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn nightly_prep_compresses_images_and_bundles() {
        let dir = TempDir::new().unwrap();
        write_outputs(dir.path());
        fs::create_dir_all(dir.path().join("upload")).unwrap();
        fs::write(dir.path().join("upload/stale"), b"old").unwrap();
        let mut cfg = config(dir.path());
        cfg.is_nightly = true;
        let run = BuildRun::with_descriptor(
            cfg,
            caps(Rc::new(RecordingRunner::succeeding())),
            descriptor(DESCRIPTOR),
        )
        .with_run_log(dir.path().join("logs/run-current.log"));

        assert_eq!(prep_upload(&run).unwrap(), StageOutcome::Completed);
        assert_eq!(
            names(&dir.path().join("upload")),
            vec!["boot.img.zst", "build.prop", "device-x.tar.zst", "logs"]
        );
        assert!(dir.path().join("device-x.tar.zst").is_file());
        assert_eq!(
            fs::read(dir.path().join("upload/build.prop")).unwrap(),
            b"ro.build=1"
        );
        assert_eq!(names(&dir.path().join("upload/logs")), vec!["run-current.log"]);
    }

    #[test]
    fn logs_from_earlier_runs_are_not_staged() {
        let dir = TempDir::new().unwrap();
        write_outputs(dir.path());
        fs::write(dir.path().join("logs/run-OLD.json"), b"{}").unwrap();
        fs::write(dir.path().join("logs/run-OLD.log"), b"old run").unwrap();

        let run = BuildRun::with_descriptor(
            config(dir.path()),
            caps(Rc::new(RecordingRunner::succeeding())),
            descriptor(DESCRIPTOR),
        );
        prep_upload(&run).unwrap();
        assert_eq!(
            names(&dir.path().join("upload")),
            vec!["build.prop", "device-x.tar.zst"]
        );

        let run = run.with_run_log(dir.path().join("logs/run-current.log"));
        prep_upload(&run).unwrap();
        assert_eq!(names(&dir.path().join("upload/logs")), vec!["run-current.log"]);
    }

    #[test]
    fn non_nightly_prep_leaves_images_out() {
        let dir = TempDir::new().unwrap();
        write_outputs(dir.path());
        let run = BuildRun::with_descriptor(
            config(dir.path()),
            caps(Rc::new(RecordingRunner::succeeding())),
            descriptor(DESCRIPTOR),
        );
        prep_upload(&run).unwrap();
        let staged = names(&dir.path().join("upload"));
        assert!(!staged.iter().any(|n| n.contains(".img")));
        assert!(staged.contains(&"device-x.tar.zst".to_string()));
    }

    fn upload_config() -> UploadConfig {
        UploadConfig {
            remote_host: Some("upload.example.org".to_string()),
            remote_basepath: Some("/pub/builds".to_string()),
            ssh_user: Some("builder".to_string()),
            ssh_key: None,
        }
    }

    fn staged_run(dir: &Path, transfer: MockTransfer) -> BuildRun {
        fs::create_dir_all(dir.join("upload")).unwrap();
        fs::write(dir.join("upload/a.tar.zst"), b"a").unwrap();
        fs::write(dir.join("upload/b.img.zst"), b"b").unwrap();
        let metadata = dir.join("out/target/product/device-x/system/metadata");
        fs::create_dir_all(&metadata).unwrap();
        fs::write(metadata.join("platform.ini"), "[Build]\nBuildID=20240101010101\n").unwrap();
        let mut cfg = config(dir);
        cfg.upload = upload_config();
        BuildRun::with_descriptor(
            cfg,
            Capabilities {
                transfer: Box::new(transfer),
                ..caps(Rc::new(RecordingRunner::succeeding()))
            },
            descriptor("{}"),
        )
    }

    #[test]
    fn upload_transfers_each_item_to_build_id_path() {
        let dir = TempDir::new().unwrap();
        let mut transfer = MockTransfer::new();
        transfer
            .expect_transfer()
            .withf(|_, dest| dest.path == "/pub/builds/main-device-x/20240101010101")
            .times(2)
            .returning(|_, _| Ok(()));
        let run = staged_run(dir.path(), transfer);
        assert_eq!(upload(&run).unwrap(), StageOutcome::Completed);
    }

    #[test]
    fn transfer_failure_degrades_but_keeps_going() {
        let dir = TempDir::new().unwrap();
        let mut transfer = MockTransfer::new();
        transfer
            .expect_transfer()
            .withf(|local, _| local.ends_with("a.tar.zst"))
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("rsync exited with 23")));
        transfer
            .expect_transfer()
            .withf(|local, _| local.ends_with("b.img.zst"))
            .times(1)
            .returning(|_, _| Ok(()));
        let run = staged_run(dir.path(), transfer);
        match upload(&run).unwrap() {
            StageOutcome::Degraded(reason) => assert!(reason.starts_with("1 of 2")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn try_upload_uses_submitter_and_checked_out_revision() {
        let dir = TempDir::new().unwrap();
        let mut transfer = MockTransfer::new();
        transfer
            .expect_transfer()
            .withf(|_, dest| dest.path == "/pub/builds/unknown-abc0123/main-device-x")
            .times(2)
            .returning(|_, _| Ok(()));
        let mut run = staged_run(dir.path(), transfer);
        run.config.is_try = true;
        run.state.borrow_mut().revision = Some("abc0123".to_string());
        assert_eq!(upload(&run).unwrap(), StageOutcome::Completed);
    }

    #[test]
    fn unconfigured_upload_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let mut run = staged_run(dir.path(), MockTransfer::new());
        run.config.upload = UploadConfig::default();
        assert!(matches!(upload(&run), Err(StageError::Config(_))));
    }
}
