use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a run currently is. Forward steps only move ahead; failure and cancellation
/// branch to `Abort`, and every run ends in exactly one of the `Finished*` steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStep {
    NotStarted,
    Downloading,
    Extracting,
    Initializing,
    CalculatingSchemaCustomizations,
    CalculatingConfigCustomizations,
    BackingUpDatabases,
    BackingUpFilesystem,
    UpgradingComponents,
    PreparingCustomizations,
    ApplyingSchemaCustomizations,
    ApplyingConfigCustomizations,
    ApplyingAdsCustomizations,
    ApplyingToolProperties,
    Verifying,
    StartingServer,
    StoppingServer,
    Abort,
    Cleanup,
    RecordingHistory,
    Finished,
    FinishedWithWarnings,
    FinishedWithErrors,
    FinishedCanceled,
}

/// Display data of a step. Only the UI reads the percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepInfo {
    pub percent: u8,
    pub summary: &'static str,
    pub log: &'static str,
}

const fn step_info(percent: u8, summary: &'static str, log: &'static str) -> StepInfo {
    StepInfo {
        percent,
        summary,
        log,
    }
}

const STEP_TABLE: &[(ProgressStep, StepInfo)] = &[
    (ProgressStep::NotStarted, step_info(0, "Not started", "Starting")),
    (
        ProgressStep::Downloading,
        step_info(10, "Downloading package", "Downloading the package"),
    ),
    (
        ProgressStep::Extracting,
        step_info(20, "Extracting package", "Extracting the package into the stage"),
    ),
    (
        ProgressStep::Initializing,
        step_info(30, "Initializing", "Checking the stage and the installed build"),
    ),
    (
        ProgressStep::CalculatingSchemaCustomizations,
        step_info(40, "Calculating schema customizations", "Diffing the live schema against its baseline"),
    ),
    (
        ProgressStep::CalculatingConfigCustomizations,
        step_info(48, "Calculating configuration customizations", "Diffing config.ldif against its baseline"),
    ),
    (
        ProgressStep::BackingUpDatabases,
        step_info(50, "Backing up databases", "Running the database backup tool"),
    ),
    (
        ProgressStep::BackingUpFilesystem,
        step_info(52, "Backing up files", "Moving the installed files into the backup"),
    ),
    (
        ProgressStep::UpgradingComponents,
        step_info(60, "Upgrading components", "Moving the staged build into place"),
    ),
    (
        ProgressStep::PreparingCustomizations,
        step_info(65, "Preparing customizations", "Starting the upgraded server in process"),
    ),
    (
        ProgressStep::ApplyingSchemaCustomizations,
        step_info(70, "Applying schema customizations", "Replaying schema.custom.diff"),
    ),
    (
        ProgressStep::ApplyingConfigCustomizations,
        step_info(73, "Applying configuration customizations", "Replaying config.custom.diff"),
    ),
    (
        ProgressStep::ApplyingAdsCustomizations,
        step_info(75, "Applying registration changes", "Adding new registration entries"),
    ),
    (
        ProgressStep::ApplyingToolProperties,
        step_info(76, "Applying tool properties", "Adding new tool defaults"),
    ),
    (
        ProgressStep::Verifying,
        step_info(80, "Verifying", "Running the server health check"),
    ),
    (
        ProgressStep::StartingServer,
        step_info(90, "Starting server", "Starting the server"),
    ),
    (
        ProgressStep::StoppingServer,
        step_info(90, "Stopping server", "Leaving the server stopped"),
    ),
    (
        ProgressStep::Abort,
        step_info(95, "Restoring the previous installation", "Aborting and restoring the backup"),
    ),
    (
        ProgressStep::Cleanup,
        step_info(96, "Cleaning up", "Removing the stage and releasing the run marker"),
    ),
    (
        ProgressStep::RecordingHistory,
        step_info(97, "Recording history", "Appending the history record"),
    ),
    (ProgressStep::Finished, step_info(100, "Finished", "Finished")),
    (
        ProgressStep::FinishedWithWarnings,
        step_info(100, "Finished with warnings", "Finished with warnings"),
    ),
    (
        ProgressStep::FinishedWithErrors,
        step_info(100, "Finished with errors", "Finished with errors"),
    ),
    (
        ProgressStep::FinishedCanceled,
        step_info(100, "Canceled", "Canceled"),
    ),
];

impl ProgressStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Downloading => "DOWNLOADING",
            Self::Extracting => "EXTRACTING",
            Self::Initializing => "INITIALIZING",
            Self::CalculatingSchemaCustomizations => "CALCULATING_SCHEMA_CUSTOMIZATIONS",
            Self::CalculatingConfigCustomizations => "CALCULATING_CONFIG_CUSTOMIZATIONS",
            Self::BackingUpDatabases => "BACKING_UP_DATABASES",
            Self::BackingUpFilesystem => "BACKING_UP_FILESYSTEM",
            Self::UpgradingComponents => "UPGRADING_COMPONENTS",
            Self::PreparingCustomizations => "PREPARING_CUSTOMIZATIONS",
            Self::ApplyingSchemaCustomizations => "APPLYING_SCHEMA_CUSTOMIZATIONS",
            Self::ApplyingConfigCustomizations => "APPLYING_CONFIG_CUSTOMIZATIONS",
            Self::ApplyingAdsCustomizations => "APPLYING_ADS_CUSTOMIZATIONS",
            Self::ApplyingToolProperties => "APPLYING_TOOL_PROPERTIES",
            Self::Verifying => "VERIFYING",
            Self::StartingServer => "STARTING_SERVER",
            Self::StoppingServer => "STOPPING_SERVER",
            Self::Abort => "ABORT",
            Self::Cleanup => "CLEANUP",
            Self::RecordingHistory => "RECORDING_HISTORY",
            Self::Finished => "FINISHED",
            Self::FinishedWithWarnings => "FINISHED_WITH_WARNINGS",
            Self::FinishedWithErrors => "FINISHED_WITH_ERRORS",
            Self::FinishedCanceled => "FINISHED_CANCELED",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        let wanted = input.trim().to_ascii_uppercase().replace('-', "_");
        STEP_TABLE
            .iter()
            .map(|(step, _)| *step)
            .find(|step| step.as_str() == wanted)
    }

    pub fn info(self) -> StepInfo {
        STEP_TABLE
            .iter()
            .find(|(step, _)| *step == self)
            .map(|(_, info)| *info)
            .unwrap_or(step_info(0, "", ""))
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Finished
                | Self::FinishedWithWarnings
                | Self::FinishedWithErrors
                | Self::FinishedCanceled
        )
    }

    /// Steps that belong to the forward sequence, before any abort or cleanup.
    pub fn is_forward(self) -> bool {
        self > Self::NotStarted && self < Self::Abort
    }

    /// Percentage reached at the end of this step.
    pub fn completion_percent(self) -> u8 {
        STEP_TABLE
            .iter()
            .map(|(_, info)| info.percent)
            .find(|percent| *percent > self.info().percent)
            .unwrap_or(100)
    }
}

impl fmt::Display for ProgressStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facts known about a run that decide which optional steps it takes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepPlan {
    pub download: bool,
    pub backup_databases: bool,
    pub apply_customizations: bool,
    pub start_server: bool,
}

/// Step that follows `current` in the forward sequence, or `None` once the requested
/// server end state was handled.
pub fn next_forward_step(current: ProgressStep, plan: &StepPlan) -> Option<ProgressStep> {
    use ProgressStep::*;

    let next = match current {
        NotStarted if plan.download => Downloading,
        NotStarted | Downloading => Extracting,
        Extracting => Initializing,
        Initializing => CalculatingSchemaCustomizations,
        CalculatingSchemaCustomizations => CalculatingConfigCustomizations,
        CalculatingConfigCustomizations if plan.backup_databases => BackingUpDatabases,
        CalculatingConfigCustomizations | BackingUpDatabases => BackingUpFilesystem,
        BackingUpFilesystem => UpgradingComponents,
        UpgradingComponents if plan.apply_customizations => PreparingCustomizations,
        PreparingCustomizations => ApplyingSchemaCustomizations,
        ApplyingSchemaCustomizations => ApplyingConfigCustomizations,
        ApplyingConfigCustomizations => ApplyingAdsCustomizations,
        ApplyingAdsCustomizations => ApplyingToolProperties,
        UpgradingComponents | ApplyingToolProperties => Verifying,
        Verifying if plan.start_server => StartingServer,
        Verifying => StoppingServer,
        StartingServer | StoppingServer | Abort | Cleanup | RecordingHistory | Finished
        | FinishedWithWarnings | FinishedWithErrors | FinishedCanceled => return None,
    };
    Some(next)
}

/// The whole forward sequence a plan walks through.
pub fn forward_sequence(plan: &StepPlan) -> Vec<ProgressStep> {
    let mut steps = Vec::new();
    let mut current = ProgressStep::NotStarted;
    while let Some(next) = next_forward_step(current, plan) {
        steps.push(next);
        current = next;
    }
    steps
}
