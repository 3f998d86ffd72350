//! Ordered stage catalogue and its fail-fast executor.
//!
//! A run executes a selection of the catalogue strictly in catalogue order.
//! A stage completes, skips, or degrades (recoverable; the run continues) or
//! returns a [`StageError`], which stops the run before any later stage.
//! Completed stages are never rolled back.

use crate::config::ConfigError;
use crate::exec::CommandFailure;
use anyhow::{bail, Result};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use tracing::{error, info, info_span, warn};

/// What a stage reports when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    /// Preconditions not met for this run; a normal, successful no-op.
    Skipped(String),
    /// Recoverable failure; the run continues but ends degraded.
    Degraded(String),
}

impl StageOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        StageOutcome::Skipped(reason.into())
    }

    pub fn degraded(reason: impl Into<String>) -> Self {
        StageOutcome::Degraded(reason.into())
    }
}

/// Fatal stage failure.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("command '{command}' failed with exit status {status}")]
    CommandFailed {
        command: String,
        status: i32,
        lines: Vec<String>,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Other(anyhow::Error),
}

impl StageError {
    /// Classified output lines that triggered the failure, if any.
    pub fn lines(&self) -> &[String] {
        match self {
            StageError::CommandFailed { lines, .. } => lines,
            _ => &[],
        }
    }
}

impl From<CommandFailure> for StageError {
    fn from(failure: CommandFailure) -> Self {
        StageError::CommandFailed {
            command: failure.command,
            status: failure.status,
            lines: failure.lines,
        }
    }
}

/// A `CommandFailure` anywhere in the chain keeps its classified lines.
impl From<anyhow::Error> for StageError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<CommandFailure>() {
            Ok(failure) => failure.into(),
            Err(err) => StageError::Other(err),
        }
    }
}

impl From<ConfigError> for StageError {
    fn from(err: ConfigError) -> Self {
        StageError::Config(err.to_string())
    }
}

pub type StageResult = std::result::Result<StageOutcome, StageError>;

/// One named unit of pipeline work over the run context `C`.
pub struct Stage<C> {
    pub name: &'static str,
    /// Member of the default selection.
    pub default: bool,
    pub action: fn(&C) -> StageResult,
}

impl<C> Stage<C> {
    pub fn new(name: &'static str, action: fn(&C) -> StageResult) -> Self {
        Self {
            name,
            default: false,
            action,
        }
    }

    pub fn by_default(mut self) -> Self {
        self.default = true;
        self
    }
}

/// Which stages a run asks for, before validation against a catalogue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSelection {
    pub base: SelectionBase,
    pub add: Vec<String>,
    pub skip: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SelectionBase {
    #[default]
    Default,
    All,
    Explicit(Vec<String>),
}

impl StageSelection {
    pub fn all() -> Self {
        Self {
            base: SelectionBase::All,
            ..Self::default()
        }
    }

    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            base: SelectionBase::Explicit(names.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Completed,
    Skipped(String),
    Degraded(String),
    Failed { reason: String, lines: Vec<String> },
}

impl StageStatus {
    pub fn label(&self) -> &'static str {
        match self {
            StageStatus::Completed => "completed",
            StageStatus::Skipped(_) => "skipped",
            StageStatus::Degraded(_) => "degraded",
            StageStatus::Failed { .. } => "failed",
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            StageStatus::Completed => None,
            StageStatus::Skipped(reason) | StageStatus::Degraded(reason) => Some(reason.as_str()),
            StageStatus::Failed { reason, .. } => Some(reason.as_str()),
        }
    }

    /// Classified output lines behind a failure.
    pub fn lines(&self) -> &[String] {
        match self {
            StageStatus::Failed { lines, .. } => lines,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRecord {
    pub name: &'static str,
    pub status: StageStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Degraded,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Degraded => write!(f, "degraded"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Per-stage results of one run, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub records: Vec<StageRecord>,
}

impl RunSummary {
    pub fn status(&self) -> RunStatus {
        if self.failed().is_some() {
            RunStatus::Failed
        } else if self
            .records
            .iter()
            .any(|r| matches!(r.status, StageStatus::Degraded(_)))
        {
            RunStatus::Degraded
        } else {
            RunStatus::Success
        }
    }

    pub fn failed(&self) -> Option<&StageRecord> {
        self.records
            .iter()
            .find(|r| matches!(r.status, StageStatus::Failed { .. }))
    }

    pub fn executed(&self) -> Vec<&'static str> {
        self.records.iter().map(|r| r.name).collect()
    }
}

pub struct Pipeline<C> {
    stages: Vec<Stage<C>>,
}

impl<C> Pipeline<C> {
    pub fn new(stages: Vec<Stage<C>>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for stage in &stages {
            if !seen.insert(stage.name) {
                bail!("duplicate stage '{}' in catalogue", stage.name);
            }
        }
        Ok(Self { stages })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name).collect()
    }

    pub fn default_names(&self) -> Vec<&'static str> {
        self.stages
            .iter()
            .filter(|s| s.default)
            .map(|s| s.name)
            .collect()
    }

    /// Validate `selection` and return the selected stage names in catalogue order.
    pub fn select(&self, selection: &StageSelection) -> Result<Vec<&'static str>, ConfigError> {
        let known = self.names();
        let check = |name: &String| -> Result<(), ConfigError> {
            if known.contains(&name.as_str()) {
                Ok(())
            } else {
                Err(ConfigError::UnknownStage {
                    name: name.clone(),
                    known: known.join(", "),
                })
            }
        };

        let mut wanted: BTreeSet<&str> = match &selection.base {
            SelectionBase::Default => self.default_names().into_iter().collect(),
            SelectionBase::All => known.iter().copied().collect(),
            SelectionBase::Explicit(names) => {
                names.iter().try_for_each(check)?;
                names.iter().map(String::as_str).collect()
            }
        };
        selection.add.iter().try_for_each(check)?;
        selection.skip.iter().try_for_each(check)?;
        wanted.extend(selection.add.iter().map(String::as_str));
        for name in &selection.skip {
            wanted.remove(name.as_str());
        }

        Ok(known
            .into_iter()
            .filter(|name| wanted.contains(name))
            .collect())
    }

    /// Run the selected stages against `ctx`, stopping at the first fatal error.
    ///
    /// Only an invalid selection is an `Err`; stage failures are reported in
    /// the returned summary.
    pub fn run(&self, ctx: &C, selection: &StageSelection) -> Result<RunSummary, ConfigError> {
        let selected = self.select(selection)?;
        info!(stages = %selected.join(","), "running pipeline");

        let mut summary = RunSummary::default();
        for stage in self.stages.iter().filter(|s| selected.contains(&s.name)) {
            let _span = info_span!("stage", name = stage.name).entered();
            info!("starting stage");
            let status = match (stage.action)(ctx) {
                Ok(StageOutcome::Completed) => {
                    info!("stage completed");
                    StageStatus::Completed
                }
                Ok(StageOutcome::Skipped(reason)) => {
                    info!(%reason, "stage skipped");
                    StageStatus::Skipped(reason)
                }
                Ok(StageOutcome::Degraded(reason)) => {
                    warn!(%reason, "stage degraded");
                    StageStatus::Degraded(reason)
                }
                Err(err) => {
                    let reason = format!("{err:#}");
                    error!(%reason, "stage failed");
                    for line in err.lines() {
                        error!("  {line}");
                    }
                    StageStatus::Failed {
                        reason,
                        lines: err.lines().to_vec(),
                    }
                }
            };
            let fatal = matches!(status, StageStatus::Failed { .. });
            summary.records.push(StageRecord {
                name: stage.name,
                status,
            });
            if fatal {
                break;
            }
        }
        Ok(summary)
    }
}
