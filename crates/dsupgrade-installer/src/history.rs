use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::layout::InstallationLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HistoryStatus {
    Success,
    Failure,
    Cancel,
}

impl HistoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Cancel => "CANCEL",
        }
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the audit log. Records are appended, never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalRecord {
    pub operation_id: String,
    pub from: String,
    pub to: String,
    pub status: HistoryStatus,
    pub note: String,
    pub timestamp: u64,
}

pub fn current_unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_secs())
}

/// Millisecond operation id; also names the run's backup directory.
pub fn new_operation_id() -> Result<String> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_millis();
    Ok(millis.to_string())
}

pub fn append_history_record(
    layout: &InstallationLayout,
    record: &HistoricalRecord,
) -> Result<PathBuf> {
    let path = layout.history_log_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut line = serde_json::to_string(record).context("failed to serialize history record")?;
    line.push('\n');

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open history log: {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("failed to append history log: {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush history log: {}", path.display()))?;
    Ok(path)
}

pub fn read_history(layout: &InstallationLayout) -> Result<Vec<HistoricalRecord>> {
    let path = layout.history_log_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read history log: {}", path.display()));
        }
    };

    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|err| {
                anyhow!(
                    "invalid history record at {}:{}: {err}",
                    path.display(),
                    index + 1
                )
            })
        })
        .collect()
}
