use std::path::Path;
use std::process::Command;

use anyhow::Result;
use tracing::debug;

use crate::layout::InstallationLayout;
use crate::process::run_command;

/// External database backup facility.
pub trait BackupTool: Send {
    /// Backs every backend up into `target_dir` and returns the tool's exit code.
    fn backup(&mut self, target_dir: &Path) -> Result<i32>;
}

#[derive(Debug, Clone)]
pub struct ScriptBackupTool {
    layout: InstallationLayout,
}

impl ScriptBackupTool {
    pub fn new(layout: InstallationLayout) -> Self {
        Self { layout }
    }
}

impl BackupTool for ScriptBackupTool {
    fn backup(&mut self, target_dir: &Path) -> Result<i32> {
        let script = self.layout.script_path("backup");
        let mut command = Command::new(&script);
        command
            .arg("--backUpAll")
            .arg("--backupDirectory")
            .arg(target_dir)
            .current_dir(self.layout.instance_root());
        let output = run_command(&mut command, &format!("failed running {}", script.display()))?;
        debug!(exit_code = output.exit_code, stderr = %output.stderr, "database backup finished");
        Ok(output.exit_code)
    }
}
