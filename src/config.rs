use anyhow::{Context, Result};
use apikey::ReconcilerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

/// keyward settings (`config.toml`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Tracked key state (default: `<state dir>/state.json`)
    pub state_file: Option<String>,
    /// Sandbox remote contents (default: `<state dir>/sandbox.json`)
    pub sandbox_file: Option<String>,
    /// Deadline for each remote-issuing operation
    pub operation_timeout_secs: Option<u64>,
    /// Parallel apply jobs
    pub jobs: usize,
    /// Treat keys the remote reports as DELETING/DELETED as gone
    pub treat_deleted_as_absent: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_file: None,
            sandbox_file: None,
            operation_timeout_secs: None,
            jobs: 4,
            treat_deleted_as_absent: true,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or the default location when `None`.
    ///
    /// A missing default file yields default settings; a missing explicit
    /// file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (paths::config_dir()?.join("config.toml"), false),
        };

        if !path.exists() {
            if explicit {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::debug!("Loaded config from {}", path.display());
        Ok(settings)
    }

    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.state_file {
            Some(path) => Ok(paths::expand(path)),
            None => Ok(paths::state_dir()?.join("state.json")),
        }
    }

    pub fn sandbox_path(&self) -> Result<PathBuf> {
        match &self.sandbox_file {
            Some(path) => Ok(paths::expand(path)),
            None => Ok(paths::state_dir()?.join("sandbox.json")),
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        let config =
            ReconcilerConfig::default().with_treat_deleted_as_absent(self.treat_deleted_as_absent);
        match self.operation_timeout_secs {
            Some(secs) => config.with_operation_timeout(Duration::from_secs(secs)),
            None => config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_partial_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "state_file = \"/tmp/kw/state.json\"\noperation_timeout_secs = 30\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.jobs, 4);
        assert_eq!(
            settings.state_path().unwrap(),
            PathBuf::from("/tmp/kw/state.json")
        );
        assert_eq!(
            settings.reconciler_config().operation_timeout,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_explicit_missing_config_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_invalid_config_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "jobs = \"many\"").unwrap();
        let err = Settings::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }
}
