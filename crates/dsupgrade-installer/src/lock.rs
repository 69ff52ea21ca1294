use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use dsupgrade_core::UpgradeError;
use tracing::warn;

use crate::fs_utils::remove_file_if_exists;
use crate::layout::InstallationLayout;
use crate::process::process_alive;

/// Time a claiming run gets to fill in a marker it just created.
const MARKER_SETTLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerOwner {
    pub operation_id: String,
    pub pid: u32,
}

/// Exclusive claim on an installation for the length of one run.
#[derive(Debug)]
pub struct RunMarker {
    path: PathBuf,
    owner: MarkerOwner,
}

impl RunMarker {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owner(&self) -> &MarkerOwner {
        &self.owner
    }

    pub fn release(self) -> Result<()> {
        remove_file_if_exists(&self.path)
            .with_context(|| format!("failed to release run marker: {}", self.path.display()))
    }
}

/// Claims the marker. Only a readable marker whose owner process is gone is reclaimed;
/// an unreadable one is refused, since its owner may still be writing it.
pub fn claim_run_marker(layout: &InstallationLayout, operation_id: &str) -> Result<RunMarker> {
    let path = layout.run_marker_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let owner = MarkerOwner {
        operation_id: operation_id.to_string(),
        pid: std::process::id(),
    };

    match write_marker(&path, &owner) {
        Ok(()) => return Ok(RunMarker { path, owner }),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to claim run marker: {}", path.display()));
        }
    }

    let existing = match read_run_marker(layout) {
        Ok(existing) => existing,
        Err(_) => {
            thread::sleep(MARKER_SETTLE_DELAY);
            read_run_marker(layout).map_err(|err| {
                UpgradeError::Application(format!(
                    "run marker {} is unreadable; remove it once no other run is active: {err:#}",
                    path.display()
                ))
            })?
        }
    };
    if let Some(existing) = &existing {
        if process_alive(existing.pid)? {
            return Err(UpgradeError::Application(format!(
                "another run (operation {}, pid {}) holds {}",
                existing.operation_id,
                existing.pid,
                path.display()
            ))
            .into());
        }
    }
    warn!(
        marker = %path.display(),
        stale_owner = ?existing,
        "reclaiming stale run marker"
    );
    remove_file_if_exists(&path)
        .with_context(|| format!("failed to remove stale run marker: {}", path.display()))?;
    write_marker(&path, &owner)
        .with_context(|| format!("failed to claim run marker: {}", path.display()))?;
    Ok(RunMarker { path, owner })
}

pub fn read_run_marker(layout: &InstallationLayout) -> Result<Option<MarkerOwner>> {
    let path = layout.run_marker_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read run marker: {}", path.display()));
        }
    };

    let mut operation_id = None;
    let mut pid = None;
    for line in raw.lines() {
        match line.split_once('=') {
            Some(("operation_id", value)) => operation_id = Some(value.trim().to_string()),
            Some(("pid", value)) => pid = value.trim().parse::<u32>().ok(),
            _ => {}
        }
    }
    match (operation_id, pid) {
        (Some(operation_id), Some(pid)) => Ok(Some(MarkerOwner { operation_id, pid })),
        _ => Err(anyhow!("malformed run marker: {}", path.display())),
    }
}

fn write_marker(path: &Path, owner: &MarkerOwner) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(
        format!("operation_id={}\npid={}\n", owner.operation_id, owner.pid).as_bytes(),
    )?;
    file.flush()
}
