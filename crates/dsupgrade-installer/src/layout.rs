use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const STAGE_DIR_NAME: &str = "upgrade";
pub const LAUNCHER_FILE_NAME: &str = "upgrade.bat";
pub const INSTANCE_LOC_FILE_NAME: &str = "instance.loc";

/// Paths of one server installation.
///
/// Binaries and shipped schema live under the install root; configuration, data and
/// runtime state live under the instance root. Both roots are the same directory for
/// a combined installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationLayout {
    install_root: PathBuf,
    instance_root: PathBuf,
}

impl InstallationLayout {
    pub fn new(install_root: impl Into<PathBuf>, instance_root: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            instance_root: instance_root.into(),
        }
    }

    pub fn combined(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self::new(root.clone(), root)
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    pub fn instance_root(&self) -> &Path {
        &self.instance_root
    }

    pub fn is_split(&self) -> bool {
        self.install_root != self.instance_root
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.install_root.join("bin")
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.install_root.join("lib")
    }

    pub fn extensions_dir(&self) -> PathBuf {
        self.lib_dir().join("extensions")
    }

    pub fn classes_dir(&self) -> PathBuf {
        self.instance_root.join("classes")
    }

    pub fn schema_dir(&self) -> PathBuf {
        self.install_root.join("config").join("schema")
    }

    pub fn user_schema_path(&self) -> PathBuf {
        self.schema_dir().join("99-user.ldif")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.instance_root.join("config")
    }

    pub fn config_ldif_path(&self) -> PathBuf {
        self.config_dir().join("config.ldif")
    }

    pub fn buildinfo_path(&self) -> PathBuf {
        self.config_dir().join("buildinfo")
    }

    pub fn baseline_dir(&self) -> PathBuf {
        self.config_dir().join("upgrade")
    }

    pub fn config_baseline_path(&self, stamp: u64) -> PathBuf {
        self.baseline_dir().join(format!("config.ldif.{stamp}"))
    }

    pub fn schema_baseline_path(&self, stamp: u64) -> PathBuf {
        self.baseline_dir().join(format!("schema.ldif.{stamp}"))
    }

    pub fn tools_properties_path(&self) -> PathBuf {
        self.config_dir().join("tools.properties")
    }

    pub fn admin_backend_path(&self) -> PathBuf {
        self.config_dir().join("admin-backend.ldif")
    }

    pub fn db_dir(&self) -> PathBuf {
        self.instance_root.join("db")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.instance_root.join("logs")
    }

    pub fn server_pid_path(&self) -> PathBuf {
        self.logs_dir().join("server.pid")
    }

    pub fn errors_log_path(&self) -> PathBuf {
        self.logs_dir().join("errors")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.instance_root.join("locks")
    }

    pub fn run_marker_path(&self) -> PathBuf {
        self.locks_dir().join("upgrade.lock")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.instance_root.join("history")
    }

    pub fn history_log_path(&self) -> PathBuf {
        self.history_dir().join("log")
    }

    pub fn backup_root(&self, operation_id: &str) -> PathBuf {
        self.history_dir().join(operation_id)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.instance_root.join("tmp")
    }

    pub fn stage_dir(&self) -> PathBuf {
        self.tmp_dir().join(STAGE_DIR_NAME)
    }

    pub fn download_path(&self, file_name: &str) -> PathBuf {
        self.tmp_dir().join(file_name)
    }

    pub fn launcher_path(&self) -> PathBuf {
        self.install_root.join(LAUNCHER_FILE_NAME)
    }

    pub fn instance_loc_path(&self) -> PathBuf {
        self.install_root.join(INSTANCE_LOC_FILE_NAME)
    }

    pub fn script_path(&self, name: &str) -> PathBuf {
        if cfg!(windows) {
            self.bin_dir().join(format!("{name}.bat"))
        } else {
            self.bin_dir().join(name)
        }
    }

    pub fn ensure_runtime_dirs(&self) -> Result<()> {
        for dir in [self.locks_dir(), self.history_dir(), self.tmp_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}
