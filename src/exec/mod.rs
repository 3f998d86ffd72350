//! The single process-spawning surface of the pipeline.
//!
//! Every external tool (build scripts, tar, git, rsync, signing) runs through a
//! [`CommandRunner`]. The production runner, [`SandboxedExecutor`], optionally
//! routes the command through a sandbox profile, streams stdout and stderr line
//! by line into the severity classifier while the process is still running,
//! and returns one [`ExecutionOutcome`] per invocation.

pub mod sandbox;

use crate::classify::{Classification, ClassificationRule, Severity};
use anyhow::{anyhow, Context, Result};
use sandbox::{SandboxProfile, SandboxProvider};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// A command to run, with everything needed to classify its output.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Overlay on top of the parent process environment.
    pub env: BTreeMap<String, String>,
    pub rules: Vec<ClassificationRule>,
    pub sandbox: Option<SandboxProfile>,
    /// A failure is logged but not surfaced by [`ExecutionOutcome::check`].
    pub tolerant: bool,
    /// Keep every output line in [`ExecutionOutcome::output`].
    pub capture: bool,
}

impl Invocation {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            env: BTreeMap::new(),
            rules: Vec::new(),
            sandbox: None,
            tolerant: false,
            capture: false,
        }
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn rules(mut self, rules: &[ClassificationRule]) -> Self {
        self.rules = rules.to_vec();
        self
    }

    pub fn sandbox(mut self, profile: Option<&SandboxProfile>) -> Self {
        self.sandbox = profile.cloned();
        self
    }

    pub fn tolerant(mut self) -> Self {
        self.tolerant = true;
        self
    }

    pub fn capture(mut self) -> Self {
        self.capture = true;
        self
    }

    /// Human-readable command line used in logs and failure reports.
    pub fn label(&self) -> String {
        self.argv.join(" ")
    }
}

/// Structured result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub command: String,
    /// Process exit code; `-1` when the process was terminated by a signal.
    pub status: i32,
    pub severity: Severity,
    pub matched: Vec<String>,
    /// All output lines, only filled for capturing invocations.
    pub output: Vec<String>,
    pub tolerant: bool,
}

impl ExecutionOutcome {
    pub fn success(&self) -> bool {
        self.status == 0 && self.severity < Severity::Error
    }

    /// Turn a failed outcome into an error carrying the matched lines.
    pub fn check(self) -> std::result::Result<Self, CommandFailure> {
        if self.success() {
            return Ok(self);
        }
        if self.tolerant {
            warn!(command = %self.command, status = self.status, "ignoring failure");
            return Ok(self);
        }
        Err(CommandFailure {
            command: self.command,
            status: self.status,
            severity: self.severity,
            lines: self.matched,
        })
    }
}

/// A non-zero exit or an error-level output line.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("command '{command}' failed (exit status {status}, output severity {severity})")]
pub struct CommandFailure {
    pub command: String,
    pub status: i32,
    pub severity: Severity,
    pub lines: Vec<String>,
}

/// Anything that can execute an [`Invocation`].
pub trait CommandRunner {
    fn run(&self, invocation: &Invocation) -> Result<ExecutionOutcome>;
}

/// Runs commands directly or inside a sandbox profile.
pub struct SandboxedExecutor {
    provider: Box<dyn SandboxProvider>,
    prepared: RefCell<BTreeSet<String>>,
}

impl SandboxedExecutor {
    pub fn new(provider: Box<dyn SandboxProvider>) -> Self {
        Self {
            provider,
            prepared: RefCell::new(BTreeSet::new()),
        }
    }

    fn ensure_prepared(&self, profile: &SandboxProfile) -> Result<()> {
        if self.prepared.borrow().contains(&profile.name) {
            return Ok(());
        }
        info!(profile = %profile.name, "preparing sandbox profile");
        // A `CommandFailure` from provisioning reaches the stage unwrapped.
        if let Err(err) = self.provider.prepare(profile, self) {
            warn!(profile = %profile.name, "sandbox preparation failed");
            return Err(err);
        }
        self.prepared.borrow_mut().insert(profile.name.clone());
        Ok(())
    }
}

impl CommandRunner for SandboxedExecutor {
    fn run(&self, invocation: &Invocation) -> Result<ExecutionOutcome> {
        let label = invocation.label();
        let argv = match &invocation.sandbox {
            Some(profile) => {
                self.ensure_prepared(profile)?;
                self.provider.wrap(profile, invocation)
            }
            None => invocation.argv.clone(),
        };

        info!(command = %label, "running");
        let mut outcome = spawn_and_classify(&label, &argv, invocation)?;
        outcome.tolerant = invocation.tolerant;
        if outcome.success() {
            debug!(command = %label, severity = %outcome.severity, "command finished");
        } else {
            warn!(
                command = %label,
                status = outcome.status,
                severity = %outcome.severity,
                "command failed"
            );
        }
        Ok(outcome)
    }
}

fn spawn_and_classify(
    label: &str,
    argv: &[String],
    invocation: &Invocation,
) -> Result<ExecutionOutcome> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command line"))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(&invocation.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &invocation.cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning '{label}'"))?;

    let (tx, rx) = mpsc::channel();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_line_reader(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_line_reader(stderr, tx.clone()));
    }
    drop(tx);

    // Drains until both readers hit EOF, classifying as lines arrive.
    let mut classification = Classification::default();
    let mut output = Vec::new();
    for line in rx {
        let severity = classification.observe(&line, &invocation.rules);
        log_output_line(severity, &line);
        if invocation.capture {
            output.push(line);
        }
    }
    for reader in readers {
        if reader.join().is_err() {
            warn!(command = %label, "output reader thread panicked");
        }
    }

    let status = child
        .wait()
        .with_context(|| format!("waiting for '{label}'"))?;

    Ok(ExecutionOutcome {
        command: label.to_string(),
        status: status.code().unwrap_or(-1),
        severity: classification.max_severity,
        matched: classification.matched,
        output,
        tolerant: invocation.tolerant,
    })
}

fn spawn_line_reader<R>(stream: R, tx: Sender<String>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

fn log_output_line(severity: Severity, line: &str) {
    match severity {
        Severity::Error => error!(target: "image_builder::output", "{line}"),
        Severity::Warning => warn!(target: "image_builder::output", "{line}"),
        Severity::None => info!(target: "image_builder::output", "{line}"),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{make_rules, ClassificationRule};
    use sandbox::MockChroot;
    use std::os::unix::fs::PermissionsExt;
    use testing::RecordingRunner;

    fn executor() -> SandboxedExecutor {
        SandboxedExecutor::new(Box::new(MockChroot::default()))
    }

    #[test]
    fn clean_exit_is_success() {
        let inv = Invocation::new(["sh", "-c", "echo hello; echo world 1>&2"]);
        let outcome = executor().run(&inv).unwrap();
        assert_eq!(outcome.status, 0);
        assert_eq!(outcome.severity, Severity::None);
        assert!(outcome.success());
    }

    #[test]
    fn non_zero_exit_is_failure() {
        let inv = Invocation::new(["sh", "-c", "exit 3"]);
        let outcome = executor().run(&inv).unwrap();
        assert_eq!(outcome.status, 3);
        let failure = outcome.check().unwrap_err();
        assert_eq!(failure.status, 3);
    }

    #[test]
    fn error_line_fails_despite_zero_exit() {
        let inv = Invocation::new(["sh", "-c", "echo 'foo.c:1: error: nope' 1>&2; exit 0"])
            .rules(&make_rules().unwrap());
        let outcome = executor().run(&inv).unwrap();
        assert_eq!(outcome.status, 0);
        assert_eq!(outcome.severity, Severity::Error);
        assert_eq!(outcome.matched, vec!["foo.c:1: error: nope".to_string()]);
        assert!(!outcome.success());
    }

    #[test]
    fn warnings_do_not_fail() {
        let rules = vec![ClassificationRule::substr("Warning: ", Severity::Warning)];
        let inv = Invocation::new(["sh", "-c", "echo 'Warning: flaky'"]).rules(&rules);
        let outcome = executor().run(&inv).unwrap();
        assert_eq!(outcome.severity, Severity::Warning);
        assert!(outcome.success());
    }

    #[test]
    fn env_and_cwd_are_applied() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut env = BTreeMap::new();
        env.insert("MARKER".to_string(), "present".to_string());
        let rules = vec![ClassificationRule::substr("present", Severity::Warning)];
        let inv = Invocation::new(["sh", "-c", "echo $MARKER > out.txt; cat out.txt"])
            .cwd(dir.path())
            .env(&env)
            .rules(&rules);
        let outcome = executor().run(&inv).unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.matched, vec!["present".to_string()]);
        assert!(dir.path().join("out.txt").is_file());
    }

    #[test]
    fn capture_keeps_all_lines() {
        let inv = Invocation::new(["sh", "-c", "echo abc123"]).capture();
        let outcome = executor().run(&inv).unwrap();
        assert_eq!(outcome.output, vec!["abc123".to_string()]);

        let quiet = Invocation::new(["sh", "-c", "echo abc123"]);
        assert!(executor().run(&quiet).unwrap().output.is_empty());
    }

    #[test]
    fn tolerant_failure_passes_check() {
        let inv = Invocation::new(["sh", "-c", "exit 1"]).tolerant();
        let outcome = executor().run(&inv).unwrap();
        assert!(!outcome.success());
        assert!(outcome.check().is_ok());
    }

    #[test]
    fn failed_sandbox_preparation_keeps_classified_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let fake_mock = dir.path().join("mock");
        std::fs::write(
            &fake_mock,
            "#!/bin/sh\necho 'ERROR: Could not find required config file' 1>&2\nexit 30\n",
        )
        .unwrap();
        std::fs::set_permissions(&fake_mock, std::fs::Permissions::from_mode(0o755)).unwrap();

        let exec = SandboxedExecutor::new(Box::new(MockChroot::with_binary(
            fake_mock.display().to_string(),
        )));
        let profile = sandbox::SandboxProfile {
            name: "builder-x86_64".to_string(),
            packages: Vec::new(),
            files: Vec::new(),
        };
        let inv = Invocation::new(["./build.sh"]).sandbox(Some(&profile));
        let err = exec.run(&inv).unwrap_err();
        let failure = err.downcast_ref::<CommandFailure>().unwrap();
        assert_eq!(failure.status, 30);
        assert!(failure.command.ends_with("-r builder-x86_64 --init"));
        assert_eq!(
            failure.lines,
            vec!["ERROR: Could not find required config file".to_string()]
        );
    }

    #[test]
    fn missing_binary_is_an_error() {
        let inv = Invocation::new(["definitely_not_a_real_command_12345"]);
        assert!(executor().run(&inv).is_err());
    }

    #[test]
    fn recording_runner_records_labels() {
        let runner = RecordingRunner::succeeding();
        runner
            .run(&Invocation::new(["tar", "xf", "snapshot.tar.xz"]))
            .unwrap();
        assert_eq!(runner.labels(), vec!["tar xf snapshot.tar.xz".to_string()]);
        assert_eq!(runner.count_starting_with("tar"), 1);
    }
}
