use super::BuildRun;
use crate::collab::Checkout;
use crate::fsutil::{clear_dir_except, LOCK_FILENAME};
use crate::pipeline::{StageError, StageOutcome, StageResult};
use anyhow::Context;
use std::collections::BTreeMap;
use std::fs;
use tracing::info;

pub(super) fn clobber(run: &BuildRun) -> StageResult {
    let config = &run.config;
    if config.is_automation {
        let reason = if config.is_nightly {
            "nightly build"
        } else if config.force_clobber {
            "forced by configuration"
        } else {
            return Ok(StageOutcome::skipped(
                "automation build that is neither nightly nor forced",
            ));
        };
        info!(reason, "clobbering work directory");
    }

    let lock = run.paths.work_dir.join(LOCK_FILENAME);
    clear_dir_except(
        &run.paths.work_dir,
        &[run.paths.log_dir.as_path(), lock.as_path()],
    )?;
    Ok(StageOutcome::Completed)
}

pub(super) fn checkout_source(run: &BuildRun) -> StageResult {
    let repo = run
        .config
        .repo
        .as_deref()
        .ok_or_else(|| StageError::Config("no source repository configured".to_string()))?;
    if let Some(parent) = run.paths.src_dir.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating '{}'", parent.display()))?;
    }
    let request = Checkout::git(repo, &run.paths.src_dir).at(run.config.revision.as_deref());
    let revision = run.caps.vcs.checkout(&request)?;
    info!(%revision, "source checked out");
    run.state.borrow_mut().revision = Some(revision);
    Ok(StageOutcome::Completed)
}

pub(super) fn checkout_userland(run: &BuildRun) -> StageResult {
    let Some(userland) = &run.descriptor()?.userland else {
        return Ok(StageOutcome::skipped("descriptor has no userland source"));
    };
    let request = Checkout::git(&userland.repo, &run.paths.userland_dir).with_vcs(&userland.vcs);
    let revision = run.caps.vcs.checkout(&request)?;
    info!(%revision, "userland checked out");
    run.state.borrow_mut().userland_revision = Some(revision);
    Ok(StageOutcome::Completed)
}

pub(super) fn checkout_locales(run: &BuildRun) -> StageResult {
    let Some(languages_file) = &run.config.languages_file else {
        return Ok(StageOutcome::skipped("no languages file given"));
    };
    let l10n = run
        .descriptor()?
        .userland
        .as_ref()
        .and_then(|u| u.l10n.as_ref())
        .ok_or_else(|| {
            StageError::Config(
                "userland.l10n is required in the descriptor when a languages file is given"
                    .to_string(),
            )
        })?;

    let path = run.paths.userland_dir.join(languages_file);
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("reading languages file '{}'", path.display()))?;
    let languages: BTreeMap<String, serde_json::Value> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing languages file '{}'", path.display()))?;

    for locale in languages.keys() {
        let repo = format!("{}/{}", l10n.root.trim_end_matches('/'), locale);
        let request =
            Checkout::git(repo, run.paths.l10n_base_dir.join(locale)).with_vcs(&l10n.vcs);
        let revision = run.caps.vcs.checkout(&request)?;
        info!(%locale, %revision, "locale checked out");
    }
    Ok(StageOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{Capabilities, MockVersionControl};
    use crate::exec::testing::RecordingRunner;
    use crate::stages::fixtures::{caps, config, descriptor};
    use std::path::PathBuf;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn populate(work: &std::path::Path) {
        fs::create_dir_all(work.join("source/build")).unwrap();
        fs::create_dir_all(work.join("logs")).unwrap();
        fs::write(work.join("logs/run-1.json"), b"{}").unwrap();
        fs::write(work.join("snapshot.tar.xz"), b"x").unwrap();
        fs::write(work.join(LOCK_FILENAME), b"").unwrap();
    }

    fn remaining(work: &std::path::Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(work)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn clobber_keeps_logs_and_lock() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        let run = BuildRun::with_descriptor(
            config(dir.path()),
            caps(Rc::new(RecordingRunner::succeeding())),
            descriptor("{}"),
        );
        assert_eq!(clobber(&run).unwrap(), StageOutcome::Completed);
        assert_eq!(remaining(dir.path()), vec![LOCK_FILENAME, "logs"]);
        assert!(dir.path().join("logs/run-1.json").is_file());
    }

    #[test]
    fn automation_clobbers_only_nightly_or_forced() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        let mut cfg = config(dir.path());
        cfg.is_automation = true;
        let run = BuildRun::with_descriptor(
            cfg.clone(),
            caps(Rc::new(RecordingRunner::succeeding())),
            descriptor("{}"),
        );
        assert!(matches!(clobber(&run).unwrap(), StageOutcome::Skipped(_)));
        assert!(dir.path().join("snapshot.tar.xz").exists());

        cfg.force_clobber = true;
        let run = BuildRun::with_descriptor(
            cfg,
            caps(Rc::new(RecordingRunner::succeeding())),
            descriptor("{}"),
        );
        assert_eq!(clobber(&run).unwrap(), StageOutcome::Completed);
        assert!(!dir.path().join("snapshot.tar.xz").exists());
    }

    #[test]
    fn checkout_source_records_revision() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.revision = Some("abc".to_string());
        let mut vcs = MockVersionControl::new();
        let expected_dest = dir.path().join("source");
        vcs.expect_checkout()
            .withf(move |req| {
                req.repo == "https://git.example.org/os"
                    && req.dest == expected_dest
                    && req.revision.as_deref() == Some("abc")
            })
            .times(1)
            .returning(|_| Ok("abc0123".to_string()));
        let run = BuildRun::with_descriptor(
            cfg,
            Capabilities {
                vcs: Box::new(vcs),
                ..caps(Rc::new(RecordingRunner::succeeding()))
            },
            descriptor("{}"),
        );
        checkout_source(&run).unwrap();
        assert_eq!(run.state.borrow().revision.as_deref(), Some("abc0123"));
    }

    #[test]
    fn checkout_source_without_repo_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.repo = None;
        let run = BuildRun::with_descriptor(
            cfg,
            caps(Rc::new(RecordingRunner::succeeding())),
            descriptor("{}"),
        );
        assert!(matches!(checkout_source(&run), Err(StageError::Config(_))));
    }

    #[test]
    fn userland_is_skipped_without_descriptor_entry() {
        let dir = TempDir::new().unwrap();
        let run = BuildRun::with_descriptor(
            config(dir.path()),
            caps(Rc::new(RecordingRunner::succeeding())),
            descriptor("{}"),
        );
        assert!(matches!(checkout_userland(&run).unwrap(), StageOutcome::Skipped(_)));
    }

    #[test]
    fn locales_require_l10n_source() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.languages_file = Some(PathBuf::from("languages.json"));
        let run = BuildRun::with_descriptor(
            cfg,
            caps(Rc::new(RecordingRunner::succeeding())),
            descriptor(r#"{"userland": {"repo": "https://git.example.org/userland"}}"#),
        );
        assert!(matches!(checkout_locales(&run), Err(StageError::Config(_))));
    }

    #[test]
    fn each_locale_is_checked_out() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("userland")).unwrap();
        fs::write(
            dir.path().join("userland/languages.json"),
            r#"{"de": "Deutsch", "fr": "Français"}"#,
        )
        .unwrap();
        let mut cfg = config(dir.path());
        cfg.languages_file = Some(PathBuf::from("languages.json"));

        let mut vcs = MockVersionControl::new();
        let l10n_dir = dir.path().join("userland-l10n");
        vcs.expect_checkout()
            .withf(move |req| {
                req.repo.starts_with("https://git.example.org/l10n/")
                    && req.dest.starts_with(&l10n_dir)
            })
            .times(2)
            .returning(|_| Ok("r1".to_string()));
        let run = BuildRun::with_descriptor(
            cfg,
            Capabilities {
                vcs: Box::new(vcs),
                ..caps(Rc::new(RecordingRunner::succeeding()))
            },
            descriptor(
                r#"{"userland": {"repo": "https://git.example.org/userland",
                                 "l10n": {"root": "https://git.example.org/l10n/"}}}"#,
            ),
        );
        assert_eq!(checkout_locales(&run).unwrap(), StageOutcome::Completed);
    }
}
