use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::step::ProgressStep;

/// Where the candidate build comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PackageSource {
    Archive { path: PathBuf },
    Directory { path: PathBuf },
    Url { url: String, sha256: Option<String> },
}

impl PackageSource {
    pub fn describe(&self) -> String {
        match self {
            Self::Archive { path } | Self::Directory { path } => path.display().to_string(),
            Self::Url { url, .. } => url.clone(),
        }
    }
}

/// Everything a run is told from outside. The debug fields replace what used to be
/// process-wide switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub package: Option<PackageSource>,
    pub perform_database_backup: bool,
    /// `None` leaves the server running or stopped as it was found.
    pub start_server: Option<bool>,
    pub verbose: bool,
    pub retain_backup: bool,
    /// Fail the run right after this step's work completes.
    pub inject_error: Option<ProgressStep>,
    /// Report a synthetic problem from the health check.
    pub inject_verify_error: bool,
    /// Leave a failed run's state in place instead of restoring the backup.
    pub skip_abort: bool,
}

impl RunConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).context("failed to parse run configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read run configuration: {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid run configuration: {}", path.display()))
    }

    pub fn downloads(&self) -> bool {
        matches!(self.package, Some(PackageSource::Url { .. }))
    }
}
