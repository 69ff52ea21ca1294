use std::path::Path;

use anyhow::{Context, Result};
use dsupgrade_core::{BuildIdentifier, BuildInfo};
use dsupgrade_installer::{validate_stage, InstallationLayout};
use dsupgrade_oracle::{is_supported, CompatibilityDirective, Transition, VersionOracle};

/// Oracle verdict for moving an installation to an already extracted build.
#[derive(Debug, Clone)]
pub struct CompatibilityReport {
    pub current: BuildIdentifier,
    pub target: BuildIdentifier,
    pub transition: Transition,
    pub directives: Vec<CompatibilityDirective>,
}

impl CompatibilityReport {
    pub fn is_supported(&self) -> bool {
        self.transition != Transition::NoOp && is_supported(&self.directives)
    }
}

/// Dry run: reads both builds and evaluates the rule table without touching anything.
pub fn check_compatibility(
    layout: &InstallationLayout,
    package_dir: &Path,
    oracle: &VersionOracle,
) -> Result<CompatibilityReport> {
    let stage = validate_stage(package_dir)?;
    let current = BuildInfo::read(&layout.buildinfo_path())
        .and_then(|info| info.identifier())
        .context("failed to read the installed build")?;
    let target = stage.candidate().clone();
    Ok(CompatibilityReport {
        transition: oracle.classify(&current, &target),
        directives: oracle.evaluate(&current, &target),
        current,
        target,
    })
}
