//! Build properties handed over by the scheduler that triggered the run.

use super::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SchedulerProperties {
    #[serde(default)]
    pub properties: BuildProperties,
    #[serde(default)]
    pub sourcestamp: Option<SourceStamp>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BuildProperties {
    pub repo_path: Option<String>,
    pub branch: Option<String>,
    pub revision: Option<String>,
    pub nightly_build: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SourceStamp {
    pub revision: Option<String>,
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Change {
    pub who: Option<String>,
}

impl SchedulerProperties {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            kind: "scheduler properties",
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|err| ConfigError::Parse {
            kind: "scheduler properties",
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    /// `properties.revision`, falling back to the source stamp.
    pub fn revision(&self) -> Option<&str> {
        self.properties.revision.as_deref().or_else(|| {
            self.sourcestamp
                .as_ref()
                .and_then(|stamp| stamp.revision.as_deref())
        })
    }

    /// Author of the first change in the source stamp.
    pub fn submitter(&self) -> Option<&str> {
        self.sourcestamp
            .as_ref()
            .and_then(|stamp| stamp.changes.first())
            .and_then(|change| change.who.as_deref())
    }
}
