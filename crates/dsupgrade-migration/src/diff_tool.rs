use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use dsupgrade_core::{diff_entries, parse_entries, write_change_records};

/// Produces the change records turning `base` into `target`.
pub trait DiffTool: Send {
    /// Writes the records to `output` and returns the tool's exit code.
    fn diff(&self, base: &Path, target: &Path, output: &Path) -> Result<i32>;
}

/// In-process LDIF differ.
#[derive(Debug, Clone, Copy, Default)]
pub struct LdifDiffTool;

impl DiffTool for LdifDiffTool {
    fn diff(&self, base: &Path, target: &Path, output: &Path) -> Result<i32> {
        let base_entries = read_entries(base)?;
        let target_entries = read_entries(target)?;
        let records = diff_entries(&base_entries, &target_entries);
        fs::write(output, write_change_records(&records))
            .with_context(|| format!("failed to write {}", output.display()))?;
        Ok(0)
    }
}

fn read_entries(path: &Path) -> Result<Vec<dsupgrade_core::Entry>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_entries(&raw).with_context(|| format!("failed parsing {}", path.display()))
}
