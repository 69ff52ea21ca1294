use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dsupgrade_core::UpgradeError;
use tracing::{info, warn};

use crate::filter::{FileFilter, RootSide, PRESERVED_FILES};
use crate::fs_utils::{copy_path, remove_path_if_exists, sorted_children};
use crate::history::current_unix_timestamp;
use crate::layout::{InstallationLayout, LAUNCHER_FILE_NAME};
use crate::server::ServerControl;
use crate::tools::BackupTool;
use crate::tree::{copy_missing, merge_move, move_filtered, purge_filtered};

/// Everything a run moved aside before touching the live tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSet {
    root: PathBuf,
    files_dir: PathBuf,
    databases_dir: PathBuf,
    created_at: u64,
}

/// One live root paired with the backup directory that mirrors it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSet {
    pub live_root: PathBuf,
    pub backup_dir: PathBuf,
    pub side: RootSide,
}

impl BackupSet {
    /// Creates a fresh backup root for `operation_id`; an existing one is an error.
    pub fn create(layout: &InstallationLayout, operation_id: &str) -> Result<Self> {
        let root = layout.backup_root(operation_id);
        if let Some(parent) = root.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::create_dir(&root).map_err(|err| {
            UpgradeError::FileSystemAccess(format!(
                "failed to create backup directory {}: {err}",
                root.display()
            ))
        })?;

        let backup = Self {
            files_dir: root.join("files"),
            databases_dir: root.join("databases"),
            created_at: current_unix_timestamp()?,
            root,
        };
        fs::create_dir_all(&backup.files_dir)
            .with_context(|| format!("failed to create {}", backup.files_dir.display()))?;
        Ok(backup)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    pub fn databases_dir(&self) -> &Path {
        &self.databases_dir
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Copies of the files migrated in place, kept so an abort can undo the migration.
    pub fn preserved_dir(&self) -> PathBuf {
        self.root.join("preserved")
    }

    pub fn schema_diff_path(&self) -> PathBuf {
        self.root.join("schema.custom.diff")
    }

    pub fn config_diff_path(&self) -> PathBuf {
        self.root.join("config.custom.diff")
    }

    pub fn ads_diff_path(&self) -> PathBuf {
        self.root.join("ads.custom.diff")
    }

    pub fn tools_properties_diff_path(&self) -> PathBuf {
        self.root.join("tools.properties.diff")
    }

    pub fn file_sets(&self, layout: &InstallationLayout) -> Vec<FileSet> {
        if !layout.is_split() {
            return vec![FileSet {
                live_root: layout.install_root().to_path_buf(),
                backup_dir: self.files_dir.clone(),
                side: RootSide::Combined,
            }];
        }
        vec![
            FileSet {
                live_root: layout.install_root().to_path_buf(),
                backup_dir: self.files_dir.join("install"),
                side: RootSide::Install,
            },
            FileSet {
                live_root: layout.instance_root().to_path_buf(),
                backup_dir: self.files_dir.join("instance"),
                side: RootSide::Instance,
            },
        ]
    }

    /// Where the install-root launcher lands inside the files backup.
    pub fn launcher_backup_path(&self, layout: &InstallationLayout) -> PathBuf {
        let install_set = self
            .file_sets(layout)
            .into_iter()
            .find(|set| set.side != RootSide::Instance)
            .map(|set| set.backup_dir)
            .unwrap_or_else(|| self.files_dir.clone());
        install_set.join(LAUNCHER_FILE_NAME)
    }
}

/// Moves the live tree into the backup. Entries moved before a failure stay in the
/// backup; undoing them is the caller's abort.
pub fn backup_filesystem(layout: &InstallationLayout, backup: &BackupSet) -> Result<Vec<PathBuf>> {
    for relative in PRESERVED_FILES {
        let live = layout.instance_root().join(relative);
        if live.is_file() {
            copy_path(&live, &backup.preserved_dir().join(relative))?;
        }
    }

    let mut moved = Vec::new();
    for set in backup.file_sets(layout) {
        let filter = FileFilter::for_backup(set.side);
        let entries = move_filtered(&set.live_root, &set.backup_dir, &filter).map_err(|err| {
            UpgradeError::FileSystemAccess(format!(
                "failed backing up {}: {err:#}",
                set.live_root.display()
            ))
        })?;
        info!(
            side = set.side.as_str(),
            entries = entries.len(),
            "backed up {}",
            set.live_root.display()
        );
        moved.extend(entries.into_iter().map(|entry| set.live_root.join(entry)));
    }
    Ok(moved)
}

pub fn backup_databases(backup: &BackupSet, tool: &mut dyn BackupTool) -> Result<()> {
    fs::create_dir_all(backup.databases_dir())
        .with_context(|| format!("failed to create {}", backup.databases_dir().display()))?;
    let exit_code = tool.backup(backup.databases_dir())?;
    if exit_code != 0 {
        return Err(UpgradeError::Tool {
            exit_code,
            message: "database backup failed".to_string(),
        }
        .into());
    }
    info!(target_dir = %backup.databases_dir().display(), "databases backed up");
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub purged: usize,
    pub restored: usize,
    pub failures: Vec<String>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Puts the backed-up tree back in place, best effort.
///
/// With `purge_upgraded` the entries a stage brought in are deleted first. A clean
/// restore removes the emptied backup directory. When `server` is given it is
/// restarted afterwards.
pub fn restore(
    layout: &InstallationLayout,
    backup: &BackupSet,
    purge_upgraded: bool,
    server: Option<&mut dyn ServerControl>,
) -> RestoreReport {
    let mut report = RestoreReport::default();

    for set in backup.file_sets(layout) {
        if purge_upgraded {
            let filter = FileFilter::for_backup(set.side);
            match purge_filtered(&set.live_root, &filter) {
                Ok(purged) => report.purged += purged,
                Err(err) => report.failures.push(format!(
                    "failed removing upgraded files from {}: {err:#}",
                    set.live_root.display()
                )),
            }
        }

        if !set.backup_dir.is_dir() {
            continue;
        }
        let children = match sorted_children(&set.backup_dir) {
            Ok(children) => children,
            Err(err) => {
                report.failures.push(format!("{err:#}"));
                continue;
            }
        };
        for name in children {
            report.restored += merge_move(
                &set.backup_dir.join(&name),
                &set.live_root.join(&name),
                &mut report.failures,
            );
        }
    }

    for relative in PRESERVED_FILES {
        let saved = backup.preserved_dir().join(relative);
        if !saved.is_file() {
            continue;
        }
        let live = layout.instance_root().join(relative);
        match copy_path(&saved, &live) {
            Ok(()) => report.restored += 1,
            Err(err) => report.failures.push(format!("{err:#}")),
        }
    }

    if report.is_clean() {
        let emptied = remove_path_if_exists(backup.files_dir())
            .and_then(|_| remove_path_if_exists(&backup.preserved_dir()));
        if let Err(err) = emptied {
            warn!("failed removing emptied backup: {err:#}");
        }
    } else {
        for failure in &report.failures {
            warn!("{failure}");
        }
    }

    if let Some(server) = server {
        let restarted = server.stop(true).and_then(|_| server.start(true));
        if let Err(err) = restarted {
            report
                .failures
                .push(format!("failed restarting the server after restore: {err:#}"));
        }
    }

    info!(
        restored = report.restored,
        purged = report.purged,
        failures = report.failures.len(),
        "restore finished"
    );
    report
}

/// Copies the install-root launcher into the backup once a run has succeeded.
pub fn copy_launcher_into_backup(layout: &InstallationLayout, backup: &BackupSet) -> Result<bool> {
    let launcher = layout.launcher_path();
    if !launcher.is_file() {
        return Ok(false);
    }
    copy_path(&launcher, &backup.launcher_backup_path(layout))?;
    Ok(true)
}

/// Drops the files backup of a successful run except the entries listed in `keep`,
/// given relative to the files backup directory.
pub fn discard_backup_files(backup: &BackupSet, keep: &[PathBuf]) -> Result<()> {
    if keep.is_empty() {
        return remove_path_if_exists(backup.files_dir());
    }
    let parked = backup.root().join("files.keep");
    remove_path_if_exists(&parked)?;
    for relative in keep {
        let source = backup.files_dir().join(relative);
        if source.exists() {
            copy_path(&source, &parked.join(relative))?;
        }
    }
    remove_path_if_exists(backup.files_dir())?;
    if parked.exists() {
        fs::rename(&parked, backup.files_dir())
            .with_context(|| format!("failed to rename {}", parked.display()))?;
    }
    Ok(())
}

/// Brings back old files the new build does not ship: keystores and task files from the
/// config directory, server extensions, and custom classes.
pub fn carry_over_files(layout: &InstallationLayout, backup: &BackupSet) -> Result<usize> {
    let sets = backup.file_sets(layout);
    let backup_dir_for = |side: RootSide| {
        sets.iter()
            .find(|set| set.side == side || set.side == RootSide::Combined)
            .map(|set| set.backup_dir.clone())
    };

    let mut copied = 0;
    if let Some(instance_backup) = backup_dir_for(RootSide::Instance) {
        copied += copy_missing(
            &instance_backup.join("config"),
            &layout.config_dir(),
            &["upgrade", "schema"],
        )?;
        copied += copy_missing(&instance_backup.join("classes"), &layout.classes_dir(), &[])?;
    }
    if let Some(install_backup) = backup_dir_for(RootSide::Install) {
        copied += copy_missing(
            &install_backup.join("lib").join("extensions"),
            &layout.extensions_dir(),
            &[],
        )?;
    }
    if copied > 0 {
        info!(entries = copied, "carried over files the new build does not ship");
    }
    Ok(copied)
}
