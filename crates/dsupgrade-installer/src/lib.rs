mod backup;
mod download;
mod filter;
mod fs_utils;
mod history;
mod layout;
mod lock;
mod process;
mod server;
mod stage;
mod tools;
mod tree;

pub use backup::{
    backup_databases, backup_filesystem, carry_over_files, copy_launcher_into_backup,
    discard_backup_files, restore, BackupSet, FileSet, RestoreReport,
};
pub use download::{download_package, sha256_file_hex, sha256_hex, verify_sha256_file};
pub use filter::{
    relative_key, Decision, FileFilter, RootSide, INSTALL_ROOT_ENTRIES, PRESERVED_FILES,
    RUNTIME_ROOTS,
};
pub use fs_utils::{copy_dir_recursive, copy_path, remove_path_if_exists};
pub use history::{
    append_history_record, current_unix_timestamp, new_operation_id, read_history,
    HistoricalRecord, HistoryStatus,
};
pub use layout::{InstallationLayout, INSTANCE_LOC_FILE_NAME, LAUNCHER_FILE_NAME, STAGE_DIR_NAME};
pub use lock::{claim_run_marker, read_run_marker, MarkerOwner, RunMarker};
pub use process::{process_alive, run_command, CommandOutput};
pub use server::{
    ScriptServerControl, ServerControl, DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL,
};
pub use stage::{
    check_stage, copy_package_dir, extract_package, move_into, validate_stage, Stage,
    StageValidity,
};
pub use tools::{BackupTool, ScriptBackupTool};

#[cfg(test)]
mod tests;
