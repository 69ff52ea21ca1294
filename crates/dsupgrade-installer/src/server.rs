use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

use crate::layout::InstallationLayout;
use crate::process::{process_alive, run_command_checked};

pub const DEFAULT_POLL_ATTEMPTS: u32 = 5;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

const PROBLEM_MARKERS: &[&str] = &["SEVERE_ERROR", "FATAL_ERROR"];

/// Control surface of the managed directory server.
pub trait ServerControl: Send {
    fn is_running(&mut self) -> Result<bool>;
    fn start(&mut self, quiet: bool) -> Result<()>;
    fn stop(&mut self, quiet: bool) -> Result<()>;
    /// Brings the upgraded build up far enough to accept configuration changes.
    fn start_in_process(&mut self) -> Result<()>;
    fn stop_in_process(&mut self) -> Result<()>;
    /// Starts the server, inspects it for startup problems, and leaves it as found.
    fn health_check(&mut self) -> Result<Vec<String>>;
}

/// Drives the server through the `start-ds`/`stop-ds` scripts of the installation.
#[derive(Debug, Clone)]
pub struct ScriptServerControl {
    layout: InstallationLayout,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl ScriptServerControl {
    pub fn new(layout: InstallationLayout) -> Self {
        Self {
            layout,
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_polling(mut self, attempts: u32, interval: Duration) -> Self {
        self.poll_attempts = attempts.max(1);
        self.poll_interval = interval;
        self
    }

    fn read_pid(&self) -> Result<Option<u32>> {
        let path = self.layout.server_pid_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read pid file {}", path.display()));
            }
        };
        Ok(raw.trim().parse().ok())
    }

    fn run_script(&self, name: &str, args: &[&str]) -> Result<()> {
        let script = self.layout.script_path(name);
        let mut command = Command::new(&script);
        command.args(args).current_dir(self.layout.instance_root());
        run_command_checked(&mut command, &format!("failed running {}", script.display()))?;
        Ok(())
    }

    fn wait_for(&mut self, running: bool) -> Result<()> {
        for attempt in 1..=self.poll_attempts {
            if self.is_running()? == running {
                return Ok(());
            }
            debug!(attempt, running, "waiting for server state");
            thread::sleep(self.poll_interval);
        }
        Err(anyhow!(
            "server did not {} after {} checks",
            if running { "start" } else { "stop" },
            self.poll_attempts
        ))
    }

    fn errors_log_len(&self) -> u64 {
        fs::metadata(self.layout.errors_log_path())
            .map(|metadata| metadata.len())
            .unwrap_or(0)
    }

    fn problems_since(&self, offset: u64) -> Result<Vec<String>> {
        let path = self.layout.errors_log_path();
        let mut file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to open {}", path.display()));
            }
        };
        file.seek(SeekFrom::Start(offset))
            .with_context(|| format!("failed to seek {}", path.display()))?;
        let mut tail = String::new();
        file.read_to_string(&mut tail)
            .with_context(|| format!("failed to read {}", path.display()))?;

        Ok(tail
            .lines()
            .filter(|line| PROBLEM_MARKERS.iter().any(|marker| line.contains(marker)))
            .map(|line| line.trim().to_string())
            .collect())
    }
}

impl ServerControl for ScriptServerControl {
    fn is_running(&mut self) -> Result<bool> {
        match self.read_pid()? {
            Some(pid) => process_alive(pid),
            None => Ok(false),
        }
    }

    fn start(&mut self, quiet: bool) -> Result<()> {
        if self.is_running()? {
            return Ok(());
        }
        info!("starting server");
        let args: &[&str] = if quiet { &["--quiet"] } else { &[] };
        self.run_script("start-ds", args)?;
        self.wait_for(true)
    }

    fn stop(&mut self, quiet: bool) -> Result<()> {
        if !self.is_running()? {
            return Ok(());
        }
        info!("stopping server");
        let args: &[&str] = if quiet { &["--quiet"] } else { &[] };
        self.run_script("stop-ds", args)?;
        self.wait_for(false)
    }

    // Changes are applied to the configuration files offline, so in-process start
    // only proves the new build can boot with them.
    fn start_in_process(&mut self) -> Result<()> {
        self.run_script("start-ds", &["--checkStartability"])
    }

    fn stop_in_process(&mut self) -> Result<()> {
        Ok(())
    }

    fn health_check(&mut self) -> Result<Vec<String>> {
        let was_running = self.is_running()?;
        let offset = self.errors_log_len();
        if !was_running {
            self.start(true)?;
        }
        let problems = self.problems_since(offset)?;
        if !was_running {
            self.stop(true)?;
        }
        Ok(problems)
    }
}
