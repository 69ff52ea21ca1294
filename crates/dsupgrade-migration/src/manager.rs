use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dsupgrade_core::{
    diff_entries, entries_equivalent, parse_entries, write_change_records, BuildIdentifier,
    ChangeOperation, ChangeRecord, ConfirmOption, ConfirmPrompt, LdifReader, PromptSeverity,
    UpgradeError, UserInteraction,
};
use dsupgrade_installer::{BackupSet, InstallationLayout};
use tracing::{debug, info, warn};

use crate::diff_tool::DiffTool;
use crate::properties::missing_properties;
use crate::store::{write_atomically, ConfigStore, LdifFileStore, SchemaStore};

const APPLIED_SUFFIX: &str = "applied";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomizationKind {
    Schema,
    Config,
    Ads,
}

impl CustomizationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Config => "configuration",
            Self::Ads => "registration",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub target: String,
    pub operation: ChangeOperation,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: usize,
    pub skipped: Vec<SkippedRecord>,
    pub already_applied: bool,
}

impl MigrationReport {
    /// One line per record the user chose to skip.
    pub fn warnings(&self) -> Vec<String> {
        self.skipped
            .iter()
            .map(|skipped| {
                format!(
                    "skipped {} of '{}': {}",
                    skipped.operation, skipped.target, skipped.error
                )
            })
            .collect()
    }
}

/// Captures local schema and configuration changes before an upgrade and replays them
/// onto the upgraded instance.
#[derive(Debug, Clone)]
pub struct MigrationManager {
    layout: InstallationLayout,
    backup: BackupSet,
    schema_customized: bool,
    config_customized: bool,
}

impl MigrationManager {
    pub fn new(layout: InstallationLayout, backup: BackupSet) -> Self {
        Self {
            layout,
            backup,
            schema_customized: false,
            config_customized: false,
        }
    }

    pub fn schema_customized(&self) -> bool {
        self.schema_customized
    }

    pub fn config_customized(&self) -> bool {
        self.config_customized
    }

    pub fn schema_diff_path(&self) -> PathBuf {
        self.backup.schema_diff_path()
    }

    pub fn config_diff_path(&self) -> PathBuf {
        self.backup.config_diff_path()
    }

    pub fn has_schema_diff(&self) -> bool {
        self.backup.schema_diff_path().is_file()
    }

    pub fn has_config_diff(&self) -> bool {
        self.backup.config_diff_path().is_file()
    }

    /// Compares the live schema and configuration with the baselines the current build
    /// shipped, remembering which of them were modified locally.
    pub fn detect_customizations(&mut self, current: &BuildIdentifier) -> Result<()> {
        let schema_baseline = self.layout.schema_baseline_path(current.stamp());
        let config_baseline = self.layout.config_baseline_path(current.stamp());
        calculation(|| {
            let baseline = read_entries(&schema_baseline)?;
            let live = vec![self.live_schema().merged_entry()?];
            self.schema_customized = !entries_equivalent(&baseline, &live);

            let baseline = read_entries(&config_baseline)?;
            let live = read_entries(&self.layout.config_ldif_path())?;
            self.config_customized = !entries_equivalent(&baseline, &live);
            Ok(())
        })?;
        info!(
            schema = self.schema_customized,
            config = self.config_customized,
            "customization check finished"
        );
        Ok(())
    }

    pub fn calculate_schema_customizations(
        &self,
        current: &BuildIdentifier,
        tool: &dyn DiffTool,
    ) -> Result<bool> {
        if !self.schema_customized {
            debug!("schema not customized, nothing to calculate");
            return Ok(false);
        }
        let baseline = self.layout.schema_baseline_path(current.stamp());
        let output = self.backup.schema_diff_path();
        calculation(|| {
            let live = self.backup.root().join("schema.current.ldif");
            let merged = self.live_schema().merged_entry()?;
            fs::write(&live, merged.to_ldif())
                .with_context(|| format!("failed to write {}", live.display()))?;
            let written = run_diff(tool, &baseline, &live, &output);
            fs::remove_file(&live)
                .with_context(|| format!("failed to remove {}", live.display()))?;
            written
        })
    }

    pub fn calculate_config_customizations(
        &self,
        current: &BuildIdentifier,
        tool: &dyn DiffTool,
    ) -> Result<bool> {
        if !self.config_customized {
            debug!("configuration not customized, nothing to calculate");
            return Ok(false);
        }
        let baseline = self.layout.config_baseline_path(current.stamp());
        let live = self.layout.config_ldif_path();
        let output = self.backup.config_diff_path();
        calculation(|| run_diff(tool, &baseline, &live, &output))
    }

    pub fn migrate_schema(
        &self,
        store: &mut dyn ConfigStore,
        interaction: Option<&dyn UserInteraction>,
    ) -> Result<MigrationReport> {
        replay(
            &self.backup.schema_diff_path(),
            CustomizationKind::Schema,
            store,
            interaction,
        )
    }

    pub fn migrate_configuration(
        &self,
        store: &mut dyn ConfigStore,
        interaction: Option<&dyn UserInteraction>,
    ) -> Result<MigrationReport> {
        replay(
            &self.backup.config_diff_path(),
            CustomizationKind::Config,
            store,
            interaction,
        )
    }

    /// Adds the registration entries the new build ships that the live
    /// `admin-backend.ldif` lacks.
    pub fn migrate_ads(
        &self,
        staged_admin_backend: &Path,
        interaction: Option<&dyn UserInteraction>,
    ) -> Result<MigrationReport> {
        let live_path = self.layout.admin_backend_path();
        let diff_path = self.backup.ads_diff_path();
        if !diff_path.is_file() {
            let live = read_entries(&live_path)?;
            let staged = read_entries(staged_admin_backend)?;
            let additions: Vec<ChangeRecord> = diff_entries(&live, &staged)
                .into_iter()
                .filter(|record| record.operation == ChangeOperation::Add)
                .collect();
            fs::write(&diff_path, write_change_records(&additions))
                .with_context(|| format!("failed to write {}", diff_path.display()))?;
        }

        let mut store = LdifFileStore::open(&live_path)?;
        replay(&diff_path, CustomizationKind::Ads, &mut store, interaction)
    }

    /// Appends tool defaults the new build introduces. Returns how many were added.
    pub fn migrate_tool_properties(&self, staged_tools_properties: &Path) -> Result<usize> {
        let live_path = self.layout.tools_properties_path();
        let existing = fs::read_to_string(&live_path)
            .with_context(|| format!("failed to read {}", live_path.display()))?;
        let incoming = fs::read_to_string(staged_tools_properties)
            .with_context(|| format!("failed to read {}", staged_tools_properties.display()))?;

        let missing = missing_properties(&existing, &incoming);
        let diff_path = self.backup.tools_properties_diff_path();
        let mut block = missing.join("\n");
        if !block.is_empty() {
            block.push('\n');
        }
        fs::write(&diff_path, &block)
            .with_context(|| format!("failed to write {}", diff_path.display()))?;
        if missing.is_empty() {
            return Ok(0);
        }

        let mut updated = existing;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(&block);
        write_atomically(&live_path, &updated)?;
        info!(added = missing.len(), "tool properties migrated");
        Ok(missing.len())
    }

    fn live_schema(&self) -> SchemaStore {
        SchemaStore::new(&self.layout.schema_dir(), &self.layout.user_schema_path())
    }
}

/// Marker written next to a diff once every record of it went through.
pub fn applied_marker_path(diff_path: &Path) -> PathBuf {
    let mut name = diff_path.as_os_str().to_owned();
    name.push(".");
    name.push(APPLIED_SUFFIX);
    PathBuf::from(name)
}

fn calculation<T>(operation: impl FnOnce() -> Result<T>) -> Result<T> {
    operation().map_err(|err| UpgradeError::MigrationCalculation(format!("{err:#}")).into())
}

fn run_diff(tool: &dyn DiffTool, base: &Path, target: &Path, output: &Path) -> Result<bool> {
    let exit_code = tool.diff(base, target, output)?;
    if exit_code != 0 {
        return Err(UpgradeError::Tool {
            exit_code,
            message: format!("diff of {} against {} failed", target.display(), base.display()),
        }
        .into());
    }
    let written = fs::metadata(output)
        .map(|metadata| metadata.len() > 0)
        .unwrap_or(false);
    if !written && output.exists() {
        fs::remove_file(output)
            .with_context(|| format!("failed to remove empty {}", output.display()))?;
    }
    Ok(written)
}

fn read_entries(path: &Path) -> Result<Vec<dsupgrade_core::Entry>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_entries(&raw).with_context(|| format!("failed parsing {}", path.display()))
}

/// Applies the records of `diff_path` in file order with per-record recovery.
fn replay(
    diff_path: &Path,
    kind: CustomizationKind,
    store: &mut dyn ConfigStore,
    interaction: Option<&dyn UserInteraction>,
) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();
    if !diff_path.is_file() {
        return Ok(report);
    }
    let marker = applied_marker_path(diff_path);
    if marker.exists() {
        info!(diff = %diff_path.display(), "customizations already applied");
        report.already_applied = true;
        return Ok(report);
    }

    let file =
        File::open(diff_path).with_context(|| format!("failed to open {}", diff_path.display()))?;
    for record in LdifReader::new(BufReader::new(file)).change_records() {
        let record = record.with_context(|| format!("failed reading {}", diff_path.display()))?;
        loop {
            let err = match store.apply(&record) {
                Ok(()) => {
                    debug!(target = %record.target, operation = %record.operation, "applied");
                    report.applied += 1;
                    break;
                }
                Err(err) => err,
            };

            let Some(interaction) = interaction else {
                return Err(err.context(format!(
                    "failed applying {} change ({} of '{}')",
                    kind.as_str(),
                    record.operation,
                    record.target
                )));
            };
            let prompt = ConfirmPrompt {
                title: format!("Error applying {} customization", kind.as_str()),
                summary: format!("{} of '{}' failed: {err:#}", record.operation, record.target),
                details: record.to_ldif(),
                severity: PromptSeverity::Error,
                options: vec![
                    ConfirmOption::Cancel,
                    ConfirmOption::Continue,
                    ConfirmOption::Retry,
                ],
                default: ConfirmOption::Cancel,
            };
            match interaction.confirm(&prompt) {
                ConfirmOption::Continue => {
                    warn!(target = %record.target, "skipping change: {err:#}");
                    report.skipped.push(SkippedRecord {
                        target: record.target.clone(),
                        operation: record.operation,
                        error: format!("{err:#}"),
                    });
                    break;
                }
                ConfirmOption::Retry => {
                    debug!(target = %record.target, "retrying change");
                }
                ConfirmOption::Cancel => {
                    return Err(UpgradeError::MigrationCanceled(format!(
                        "{} migration stopped at '{}'",
                        kind.as_str(),
                        record.target
                    ))
                    .into());
                }
            }
        }
    }

    let mut marker_file = File::create(&marker)
        .with_context(|| format!("failed to create {}", marker.display()))?;
    writeln!(marker_file, "applied={}", report.applied)
        .with_context(|| format!("failed to write {}", marker.display()))?;
    info!(
        kind = kind.as_str(),
        applied = report.applied,
        skipped = report.skipped.len(),
        "customizations applied"
    );
    Ok(report)
}
