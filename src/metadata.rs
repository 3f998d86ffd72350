//! Reads build identity from the generated `platform.ini` / `application.ini`.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::fs;
use std::path::Path;

fn read_key(path: &Path, pattern: &str, what: &str) -> Result<String> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading build metadata '{}'", path.display()))?;
    let re = Regex::new(pattern).with_context(|| format!("compiling '{pattern}'"))?;
    re.captures(&data)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end_matches('\r').to_string())
        .ok_or_else(|| anyhow!("no {what} in '{}'", path.display()))
}

/// `BuildID=<digits>` from platform.ini.
pub fn read_build_id(platform_ini: &Path) -> Result<String> {
    read_key(platform_ini, r"(?m)^BuildID=(\d+)\r?$", "BuildID")
}

/// `Version=<string>` from application.ini.
pub fn read_version(application_ini: &Path) -> Result<String> {
    read_key(application_ini, r"(?m)^Version=(.+)$", "Version")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reads_line_anchored_keys() {
        let dir = TempDir::new().unwrap();
        let platform = dir.path().join("platform.ini");
        fs::write(
            &platform,
            "[Build]\nOldBuildID=1\nBuildID=20240101010101\nSourceStamp=abc\n",
        )
        .unwrap();
        assert_eq!(read_build_id(&platform).unwrap(), "20240101010101");

        let app = dir.path().join("application.ini");
        fs::write(&app, "[App]\nName=Device\nVersion=18.0\n").unwrap();
        assert_eq!(read_version(&app).unwrap(), "18.0");
    }

    #[test]
    fn non_numeric_build_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let platform = dir.path().join("platform.ini");
        fs::write(&platform, "BuildID=nightly\n").unwrap();
        assert!(read_build_id(&platform).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(read_version(&dir.path().join("absent.ini")).is_err());
    }
}
