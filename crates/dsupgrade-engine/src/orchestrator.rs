use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use anyhow::{anyhow, Context, Result};
use dsupgrade_core::{
    BuildIdentifier, BuildInfo, ConfirmOption, ConfirmPrompt, PackageFormat, PromptSeverity,
    UpgradeError, UserInteraction,
};
use dsupgrade_installer::{
    append_history_record, backup_databases, backup_filesystem, carry_over_files,
    claim_run_marker, copy_launcher_into_backup, copy_package_dir, current_unix_timestamp,
    discard_backup_files, download_package, extract_package, move_into, new_operation_id,
    remove_path_if_exists, restore, validate_stage, BackupSet, BackupTool, FileFilter,
    HistoricalRecord, HistoryStatus, InstallationLayout, RootSide, RunMarker,
    ScriptBackupTool, ScriptServerControl, ServerControl, Stage,
};
use dsupgrade_migration::{
    DiffTool, LdifDiffTool, LdifFileStore, MigrationManager, MigrationReport, SchemaStore,
};
use dsupgrade_oracle::{present_directives, Transition, VersionOracle};
use tracing::{debug, error, info, warn};

use crate::config::{PackageSource, RunConfig};
use crate::outcome::{RunOutcome, RunReport};
use crate::progress::{CancelToken, ProgressEvent};
use crate::step::{next_forward_step, ProgressStep, StepPlan};

/// External parts a run drives.
pub struct Collaborators {
    pub server: Box<dyn ServerControl>,
    pub backup_tool: Box<dyn BackupTool>,
    pub diff_tool: Box<dyn DiffTool>,
    /// `None` runs non-interactively: every confirmation fails closed.
    pub interaction: Option<Box<dyn UserInteraction>>,
}

impl Collaborators {
    /// Script-driven collaborators of a real installation, without interaction.
    pub fn for_installation(layout: &InstallationLayout) -> Self {
        Self {
            server: Box::new(ScriptServerControl::new(layout.clone())),
            backup_tool: Box::new(ScriptBackupTool::new(layout.clone())),
            diff_tool: Box::new(LdifDiffTool),
            interaction: None,
        }
    }

    pub fn with_interaction(mut self, interaction: Box<dyn UserInteraction>) -> Self {
        self.interaction = Some(interaction);
        self
    }
}

/// Upgrades or reverts one installation to the build of a package.
pub struct Orchestrator {
    layout: InstallationLayout,
    config: RunConfig,
    oracle: VersionOracle,
    collaborators: Collaborators,
}

impl Orchestrator {
    pub fn new(
        layout: InstallationLayout,
        config: RunConfig,
        oracle: VersionOracle,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            layout,
            config,
            oracle,
            collaborators,
        }
    }

    pub fn layout(&self) -> &InstallationLayout {
        &self.layout
    }

    /// Runs every step on the calling thread and reports the outcome. Progress goes to
    /// `events`; a dropped receiver does not stop the run.
    pub fn run(self, events: Sender<ProgressEvent>, cancel: CancelToken) -> RunReport {
        let operation_id =
            new_operation_id().unwrap_or_else(|_| format!("pid-{}", std::process::id()));
        info!(
            operation_id = %operation_id,
            instance = %self.layout.instance_root().display(),
            "upgrade run started"
        );
        let mut run = RunState::new(self, events, cancel, operation_id);
        let error = run.forward().err();
        run.finish(error)
    }
}

struct RunState {
    layout: InstallationLayout,
    config: RunConfig,
    oracle: VersionOracle,
    collaborators: Collaborators,
    events: Sender<ProgressEvent>,
    cancel: CancelToken,
    operation_id: String,
    step: ProgressStep,
    plan: StepPlan,
    marker: Option<RunMarker>,
    downloaded: Option<PathBuf>,
    stage: Option<Stage>,
    current: Option<BuildIdentifier>,
    target: Option<BuildIdentifier>,
    backup: Option<BackupSet>,
    migration: Option<MigrationManager>,
    server_was_running: bool,
    server_stopped: bool,
    ads_pending: bool,
    tools_pending: bool,
    backup_started: bool,
    upgrade_started: bool,
    wrote_instance_location: bool,
    warnings: Vec<String>,
}

impl RunState {
    fn new(
        orchestrator: Orchestrator,
        events: Sender<ProgressEvent>,
        cancel: CancelToken,
        operation_id: String,
    ) -> Self {
        let plan = StepPlan {
            download: orchestrator.config.downloads(),
            backup_databases: orchestrator.config.perform_database_backup,
            ..StepPlan::default()
        };
        Self {
            layout: orchestrator.layout,
            config: orchestrator.config,
            oracle: orchestrator.oracle,
            collaborators: orchestrator.collaborators,
            events,
            cancel,
            operation_id,
            step: ProgressStep::NotStarted,
            plan,
            marker: None,
            downloaded: None,
            stage: None,
            current: None,
            target: None,
            backup: None,
            migration: None,
            server_was_running: false,
            server_stopped: false,
            ads_pending: false,
            tools_pending: false,
            backup_started: false,
            upgrade_started: false,
            wrote_instance_location: false,
            warnings: Vec::new(),
        }
    }

    fn forward(&mut self) -> Result<()> {
        self.layout.ensure_runtime_dirs()?;
        self.marker = Some(claim_run_marker(&self.layout, &self.operation_id)?);

        let mut previous = ProgressStep::NotStarted;
        while let Some(step) = next_forward_step(previous, &self.plan) {
            self.check_canceled()?;
            self.enter(step);
            self.execute(step)
                .with_context(|| format!("{} failed", step.info().summary.to_lowercase()))?;
            if self.config.inject_error == Some(step) {
                return Err(UpgradeError::Application(format!("injected error after {step}")).into());
            }
            debug!(step = step.as_str(), "step finished");
            previous = step;
        }
        self.check_canceled()
    }

    fn execute(&mut self, step: ProgressStep) -> Result<()> {
        match step {
            ProgressStep::Downloading => self.download(),
            ProgressStep::Extracting => self.extract(),
            ProgressStep::Initializing => self.initialize(),
            ProgressStep::CalculatingSchemaCustomizations => {
                let current = self.current_build()?;
                let saved = self
                    .migration()?
                    .calculate_schema_customizations(&current, self.collaborators.diff_tool.as_ref())?;
                if saved {
                    self.notify("schema customizations saved for migration");
                }
                Ok(())
            }
            ProgressStep::CalculatingConfigCustomizations => {
                let current = self.current_build()?;
                let saved = self
                    .migration()?
                    .calculate_config_customizations(&current, self.collaborators.diff_tool.as_ref())?;
                if saved {
                    self.notify("configuration customizations saved for migration");
                }
                Ok(())
            }
            ProgressStep::BackingUpDatabases => {
                let backup = self.backup()?.clone();
                backup_databases(&backup, self.collaborators.backup_tool.as_mut())
            }
            ProgressStep::BackingUpFilesystem => self.backup_files(),
            ProgressStep::UpgradingComponents => self.upgrade_components(),
            ProgressStep::PreparingCustomizations => self.collaborators.server.start_in_process(),
            ProgressStep::ApplyingSchemaCustomizations => {
                let mut store =
                    SchemaStore::new(&self.layout.schema_dir(), &self.layout.user_schema_path());
                let report = self
                    .migration()?
                    .migrate_schema(&mut store, self.collaborators.interaction.as_deref())?;
                self.absorb(report);
                Ok(())
            }
            ProgressStep::ApplyingConfigCustomizations => {
                if !self.migration()?.has_config_diff() {
                    return Ok(());
                }
                let mut store = LdifFileStore::open(&self.layout.config_ldif_path())?;
                let report = self
                    .migration()?
                    .migrate_configuration(&mut store, self.collaborators.interaction.as_deref())?;
                self.absorb(report);
                Ok(())
            }
            ProgressStep::ApplyingAdsCustomizations => {
                if !self.ads_pending {
                    return Ok(());
                }
                let staged = self.stage()?.layout().admin_backend_path();
                let report = self
                    .migration()?
                    .migrate_ads(&staged, self.collaborators.interaction.as_deref())?;
                self.absorb(report);
                Ok(())
            }
            ProgressStep::ApplyingToolProperties => {
                if self.tools_pending {
                    let staged = self.stage()?.layout().tools_properties_path();
                    let added = self.migration()?.migrate_tool_properties(&staged)?;
                    if added > 0 {
                        self.notify(&format!("{added} new tool default(s) added"));
                    }
                }
                self.collaborators.server.stop_in_process()
            }
            ProgressStep::Verifying => self.verify(),
            ProgressStep::StartingServer => {
                if let Err(err) = self.collaborators.server.start(false) {
                    self.warn(format!("the server could not be started: {err:#}"));
                }
                Ok(())
            }
            ProgressStep::StoppingServer => {
                match self.collaborators.server.is_running() {
                    Ok(false) => {}
                    Ok(true) => {
                        if let Err(err) = self.collaborators.server.stop(false) {
                            self.warn(format!("the server could not be stopped: {err:#}"));
                        }
                    }
                    Err(err) => self.warn(format!("the server state is unknown: {err:#}")),
                }
                Ok(())
            }
            other => Err(anyhow!("{other} is not a forward step")),
        }
    }

    fn download(&mut self) -> Result<()> {
        let Some(PackageSource::Url { url, sha256 }) = self.config.package.clone() else {
            return Ok(());
        };
        let file_name = url
            .rsplit('/')
            .next()
            .and_then(|name| name.split(['?', '#']).next())
            .filter(|name| !name.is_empty())
            .unwrap_or("package.zip");
        let destination = self.layout.download_path(file_name);
        let events = self.events.clone();
        let downloaded = download_package(&url, &destination, sha256.as_deref(), &mut |ratio| {
            let _ = events.send(ProgressEvent::Ratio(ratio));
        });
        if let Err(err) = downloaded {
            let _ = remove_path_if_exists(&destination);
            return Err(err);
        }
        self.downloaded = Some(destination);
        Ok(())
    }

    fn extract(&mut self) -> Result<()> {
        let stage_dir = self.layout.stage_dir();
        remove_path_if_exists(&stage_dir)?;

        let source = match (&self.downloaded, &self.config.package) {
            (Some(archive), _) => PackageSource::Archive {
                path: archive.clone(),
            },
            (None, Some(source)) => source.clone(),
            (None, None) => {
                return Err(UpgradeError::InvalidPackage("no package was given".to_string()).into())
            }
        };
        info!(package = %source.describe(), stage = %stage_dir.display(), "staging package");

        let staged = match &source {
            PackageSource::Directory { path } => copy_package_dir(path, &stage_dir),
            PackageSource::Archive { path } => {
                let format = PackageFormat::infer_from_name(&path.to_string_lossy()).ok_or_else(
                    || {
                        UpgradeError::InvalidPackage(format!(
                            "unsupported package format: {}",
                            path.display()
                        ))
                    },
                )?;
                let events = self.events.clone();
                extract_package(path, &stage_dir, format, None, &mut |ratio| {
                    let _ = events.send(ProgressEvent::Ratio(ratio));
                })
            }
            PackageSource::Url { url, .. } => Err(anyhow!("package {url} was not downloaded")),
        };
        if let Err(err) = staged {
            let _ = remove_path_if_exists(&stage_dir);
            return Err(err);
        }
        Ok(())
    }

    fn initialize(&mut self) -> Result<()> {
        let stage = validate_stage(&self.layout.stage_dir())?;
        let current = BuildInfo::read(&self.layout.buildinfo_path())
            .and_then(|info| info.identifier())
            .context("failed to read the installed build")?;
        let target = stage.candidate().clone();
        self.current = Some(current.clone());
        self.target = Some(target.clone());
        self.stage = Some(stage);

        let transition = self.oracle.classify(&current, &target);
        info!(
            from = %current,
            to = %target,
            transition = transition.as_str(),
            "transition classified"
        );
        if transition == Transition::NoOp {
            return Err(UpgradeError::Application(format!("already at build {current}")).into());
        }

        let directives = self.oracle.evaluate(&current, &target);
        let verdict = present_directives(
            &current,
            &target,
            &directives,
            self.collaborators.interaction.as_deref(),
        )?;
        for notice in &verdict.notices {
            self.notify(notice);
        }

        self.server_was_running = self.collaborators.server.is_running()?;
        let requested_start = self.config.start_server.unwrap_or(self.server_was_running);
        if requested_start && verdict.suppress_server_start {
            self.warn(
                "the server is left stopped until the required manual action is done".to_string(),
            );
        }
        self.plan.start_server = requested_start && !verdict.suppress_server_start;

        if self.server_was_running {
            self.collaborators.server.stop(true)?;
            self.server_stopped = true;
        }

        let backup = BackupSet::create(&self.layout, &self.operation_id)?;
        let mut migration = MigrationManager::new(self.layout.clone(), backup.clone());
        self.backup = Some(backup);
        migration.detect_customizations(&current)?;
        self.migration = Some(migration);
        Ok(())
    }

    fn backup_files(&mut self) -> Result<()> {
        self.backup_started = true;
        let backup = self.backup()?.clone();
        let staged = self.stage()?.layout();
        self.ads_pending =
            self.layout.admin_backend_path().is_file() && staged.admin_backend_path().is_file();
        self.tools_pending = self.layout.tools_properties_path().is_file()
            && staged.tools_properties_path().is_file();

        let moved = backup_filesystem(&self.layout, &backup)?;
        if moved.is_empty() {
            return Err(UpgradeError::FileSystemAccess(format!(
                "nothing to back up under {}",
                self.layout.install_root().display()
            ))
            .into());
        }
        Ok(())
    }

    fn upgrade_components(&mut self) -> Result<()> {
        self.upgrade_started = true;
        let stage_dir = self.stage()?.directory().to_path_buf();

        if self.layout.is_split() {
            move_into(
                &stage_dir,
                self.layout.install_root(),
                &FileFilter::new(RootSide::Install),
            )?;
            move_into(
                &stage_dir,
                self.layout.instance_root(),
                &FileFilter::new(RootSide::Instance),
            )?;
            self.wrote_instance_location = write_instance_location(&self.layout)?;
        } else {
            move_into(
                &stage_dir,
                self.layout.install_root(),
                &FileFilter::new(RootSide::Combined),
            )?;
        }

        let backup = self.backup()?.clone();
        carry_over_files(&self.layout, &backup)?;

        let migration = self.migration()?;
        let pending = migration.has_schema_diff()
            || migration.has_config_diff()
            || self.ads_pending
            || self.tools_pending;
        self.plan.apply_customizations = pending;
        Ok(())
    }

    fn verify(&mut self) -> Result<()> {
        let mut problems = self.collaborators.server.health_check()?;
        if self.config.inject_verify_error {
            problems.push("injected verification problem".to_string());
        }
        if problems.is_empty() {
            info!("health check found no problems");
            return Ok(());
        }
        for problem in &problems {
            warn!(problem = %problem, "health check problem");
        }

        let Some(interaction) = self.collaborators.interaction.as_deref() else {
            return Err(UpgradeError::NoninteractiveConfirmationRequired(format!(
                "the health check reported problems: {}",
                problems.join("; ")
            ))
            .into());
        };
        let prompt = ConfirmPrompt {
            title: "Verification problems".to_string(),
            summary: format!(
                "The upgraded server reported {} problem(s) at startup.",
                problems.len()
            ),
            details: problems.join("\n"),
            severity: PromptSeverity::Warning,
            options: vec![ConfirmOption::Continue, ConfirmOption::Cancel],
            default: ConfirmOption::Cancel,
        };
        match interaction.confirm(&prompt) {
            ConfirmOption::Continue => {
                for problem in problems {
                    self.warn(problem);
                }
                Ok(())
            }
            _ => Err(UpgradeError::Canceled.into()),
        }
    }

    fn finish(mut self, error: Option<anyhow::Error>) -> RunReport {
        if let Some(err) = &error {
            if UpgradeError::is_cancellation(err) {
                info!(step = self.step.as_str(), "run canceled");
            } else {
                error!(step = self.step.as_str(), "run failed: {err:#}");
            }
            self.enter(ProgressStep::Abort);
            self.abort();
        }

        self.enter(ProgressStep::Cleanup);
        self.cleanup(error.is_none());

        let outcome = match &error {
            Some(err) if UpgradeError::is_cancellation(err) => RunOutcome::Canceled,
            Some(err) => RunOutcome::Failure {
                kind: UpgradeError::kind_of(err),
                message: format!("{err:#}"),
            },
            None if self.warnings.is_empty() => RunOutcome::Success,
            None => RunOutcome::SuccessWithWarnings(self.warnings.join("\n")),
        };

        self.enter(ProgressStep::RecordingHistory);
        self.record_history(&outcome);

        let final_step = outcome.terminal_step();
        self.enter(final_step);
        let _ = self.events.send(ProgressEvent::Finished(outcome.clone()));
        info!(
            operation_id = %self.operation_id,
            outcome = final_step.as_str(),
            "upgrade run finished"
        );

        RunReport {
            operation_id: self.operation_id,
            outcome,
            final_step,
            warnings: self.warnings,
            from: self.current.map(|build| build.to_string()),
            to: self.target.map(|build| build.to_string()),
            history_log: self.layout.history_log_path(),
            backup_root: self.backup.map(|backup| backup.root().to_path_buf()),
        }
    }

    /// Puts the installation back the way it was found, best effort.
    fn abort(&mut self) {
        if !self.backup_started {
            if self.server_stopped {
                if let Err(err) = self.collaborators.server.start(true) {
                    self.warn(format!("the server could not be restarted: {err:#}"));
                }
            }
            return;
        }
        if self.config.skip_abort {
            warn!("restore skipped, installation left as is for inspection");
            self.warn("the previous installation was not restored".to_string());
            return;
        }
        let Some(backup) = self.backup.clone() else {
            return;
        };

        // A server the new build started must not keep running on the restored files.
        match self.collaborators.server.is_running() {
            Ok(false) => {}
            Ok(true) => {
                if let Err(err) = self.collaborators.server.stop(true) {
                    self.warn(format!("the server could not be stopped before restoring: {err:#}"));
                }
            }
            Err(err) => self.warn(format!("the server state is unknown: {err:#}")),
        }

        let server: Option<&mut dyn ServerControl> = if self.server_was_running {
            Some(self.collaborators.server.as_mut())
        } else {
            None
        };
        let report = restore(&self.layout, &backup, self.upgrade_started, server);
        if report.is_clean() {
            self.notify("the previous installation was restored");
        }
        for failure in report.failures {
            self.warn(failure);
        }

        if self.wrote_instance_location {
            let path = self.layout.instance_loc_path();
            if let Err(err) = remove_path_if_exists(&path) {
                self.warn(format!("failed removing {}: {err:#}", path.display()));
            }
        }
    }

    fn cleanup(&mut self, succeeded: bool) {
        // Without the marker the stage belongs to whichever run holds it.
        let Some(marker) = self.marker.take() else {
            return;
        };
        if let Err(err) = remove_path_if_exists(&self.layout.stage_dir()) {
            warn!("failed removing the stage: {err:#}");
        }
        if let Some(archive) = self.downloaded.take() {
            if let Err(err) = remove_path_if_exists(&archive) {
                warn!("failed removing the downloaded package: {err:#}");
            }
        }
        if succeeded {
            if let Some(backup) = self.backup.clone() {
                if let Err(err) = self.finalize_backup(&backup) {
                    self.warn(format!("failed tidying the backup: {err:#}"));
                }
            }
        }
        if let Err(err) = marker.release() {
            warn!("{err:#}");
        }
    }

    /// Keeps what the reversion tool needs from the files backup of a successful run.
    fn finalize_backup(&self, backup: &BackupSet) -> Result<()> {
        if !backup.launcher_backup_path(&self.layout).exists() {
            copy_launcher_into_backup(&self.layout, backup)?;
        }
        if self.config.retain_backup {
            return Ok(());
        }
        let keep = preserved_backup_entries(&self.layout, backup);
        discard_backup_files(backup, &keep)
    }

    fn record_history(&self, outcome: &RunOutcome) {
        let (status, note) = match outcome {
            RunOutcome::Success => (HistoryStatus::Success, String::new()),
            RunOutcome::SuccessWithWarnings(warning) => {
                (HistoryStatus::Success, warning.replace('\n', "; "))
            }
            RunOutcome::Failure { message, .. } => (HistoryStatus::Failure, message.clone()),
            RunOutcome::Canceled => (HistoryStatus::Cancel, "canceled by user".to_string()),
        };
        let record = HistoricalRecord {
            operation_id: self.operation_id.clone(),
            from: build_label(self.current.as_ref()),
            to: build_label(self.target.as_ref()),
            status,
            note,
            timestamp: current_unix_timestamp().unwrap_or_default(),
        };
        match append_history_record(&self.layout, &record) {
            Ok(path) => debug!(log = %path.display(), "history record appended"),
            Err(err) => error!("failed recording history: {err:#}"),
        }
    }

    fn check_canceled(&self) -> Result<()> {
        if self.cancel.is_canceled() {
            return Err(UpgradeError::Canceled.into());
        }
        Ok(())
    }

    fn enter(&mut self, step: ProgressStep) {
        self.step = step;
        info!(step = step.as_str(), "{}", step.info().log);
        let _ = self.events.send(ProgressEvent::Step(step));
    }

    fn notify(&self, message: &str) {
        info!("{message}");
        let _ = self.events.send(ProgressEvent::Notice(message.to_string()));
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        let _ = self.events.send(ProgressEvent::Notice(message.clone()));
        self.warnings.push(message);
    }

    fn absorb(&mut self, report: MigrationReport) {
        for warning in report.warnings() {
            self.warn(warning);
        }
    }

    fn current_build(&self) -> Result<BuildIdentifier> {
        self.current
            .clone()
            .ok_or_else(|| anyhow!("the installed build is not known yet"))
    }

    fn stage(&self) -> Result<&Stage> {
        self.stage
            .as_ref()
            .ok_or_else(|| anyhow!("the stage is not validated yet"))
    }

    fn backup(&self) -> Result<&BackupSet> {
        self.backup
            .as_ref()
            .ok_or_else(|| anyhow!("the backup is not created yet"))
    }

    fn migration(&self) -> Result<&MigrationManager> {
        self.migration
            .as_ref()
            .ok_or_else(|| anyhow!("customizations are not checked yet"))
    }
}

fn build_label(build: Option<&BuildIdentifier>) -> String {
    build
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Writes `instance.loc` when missing. Returns whether this call created it.
fn write_instance_location(layout: &InstallationLayout) -> Result<bool> {
    let path = layout.instance_loc_path();
    if path.exists() {
        return Ok(false);
    }
    fs::write(&path, format!("{}\n", layout.instance_root().display()))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

/// Files-backup entries, relative to the files directory, kept after a successful run.
fn preserved_backup_entries(layout: &InstallationLayout, backup: &BackupSet) -> Vec<PathBuf> {
    let mut keep = Vec::new();
    let mut push = |path: PathBuf| {
        if let Ok(relative) = path.strip_prefix(backup.files_dir()) {
            keep.push(relative.to_path_buf());
        }
    };
    push(backup.launcher_backup_path(layout));
    for set in backup.file_sets(layout) {
        if set.side != RootSide::Install {
            push(set.backup_dir.join(Path::new("config").join("buildinfo")));
        }
    }
    keep
}
