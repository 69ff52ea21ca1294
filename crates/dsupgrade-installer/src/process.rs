use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};

/// Outcome of an external command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub fn run_command(command: &mut Command, context_message: &str) -> Result<CommandOutput> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

pub fn run_command_checked(command: &mut Command, context_message: &str) -> Result<CommandOutput> {
    let output = run_command(command, context_message)?;
    if output.success() {
        return Ok(output);
    }
    Err(anyhow!(
        "{context_message}: exit code {} stdout='{}' stderr='{}'",
        output.exit_code,
        output.stdout,
        output.stderr
    ))
}

pub fn process_alive(pid: u32) -> Result<bool> {
    #[cfg(unix)]
    {
        let status = Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("failed executing liveness probe for pid={pid}"))?;
        Ok(status.success())
    }

    #[cfg(windows)]
    {
        let output = Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}"), "/FO", "CSV", "/NH"])
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("failed executing liveness probe for pid={pid}"))?;

        if !output.status.success() {
            return Err(anyhow!(
                "liveness probe failed for pid={pid}: status={} stderr='{}'",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        Ok(stdout.contains(&format!(",\"{pid}\""))
            && !stdout.to_ascii_lowercase().contains("no tasks are running"))
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        Ok(true)
    }
}
