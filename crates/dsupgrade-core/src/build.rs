use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context};
use semver::Version;
use serde::{Deserialize, Serialize};

/// Totally ordered build stamp (`yyyyMMddHHmmss`) with a display label.
///
/// Ordering and equality only look at the stamp; the label is carried along for
/// messages and history records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildIdentifier {
    stamp: u64,
    label: String,
}

impl BuildIdentifier {
    pub fn new(stamp: u64, label: impl Into<String>) -> Self {
        Self {
            stamp,
            label: label.into(),
        }
    }

    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let trimmed = input.trim();
        if trimmed.len() != 14 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(anyhow!(
                "build stamp must be 14 ASCII digits (yyyyMMddHHmmss): '{trimmed}'"
            ));
        }
        let stamp = trimmed
            .parse::<u64>()
            .with_context(|| format!("invalid build stamp: '{trimmed}'"))?;
        Ok(Self::new(stamp, trimmed))
    }

    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl PartialEq for BuildIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.stamp == other.stamp
    }
}

impl Eq for BuildIdentifier {}

impl PartialOrd for BuildIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BuildIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.stamp.cmp(&other.stamp)
    }
}

impl fmt::Display for BuildIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildInfo {
    pub name: String,
    pub version: Version,
    pub build: String,
}

impl BuildInfo {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let info: Self = toml::from_str(input).context("failed to parse buildinfo")?;
        if info.name.trim().is_empty() {
            return Err(anyhow!("buildinfo name must not be empty"));
        }
        BuildIdentifier::parse(&info.build)?;
        Ok(info)
    }

    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read buildinfo: {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("failed parsing buildinfo: {}", path.display()))
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string(self).context("failed to serialize buildinfo")
    }

    pub fn identifier(&self) -> anyhow::Result<BuildIdentifier> {
        let parsed = BuildIdentifier::parse(&self.build)?;
        Ok(BuildIdentifier::new(
            parsed.stamp(),
            format!("{} {} (build {})", self.name, self.version, parsed.label()),
        ))
    }
}
