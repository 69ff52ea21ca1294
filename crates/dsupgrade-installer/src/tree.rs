use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use crate::filter::{Decision, FileFilter};
use crate::fs_utils::{copy_path, is_dir_empty, move_path, remove_path_if_exists, sorted_children};

/// Moves every entry of `src_root` the filter takes into `dst_root`, replacing what is
/// already there. Returns the relative paths that were moved.
pub fn move_filtered(src_root: &Path, dst_root: &Path, filter: &FileFilter) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dst_root)
        .with_context(|| format!("failed to create {}", dst_root.display()))?;
    let mut moved = Vec::new();
    move_level(src_root, dst_root, Path::new(""), filter, &mut moved)?;
    Ok(moved)
}

fn move_level(
    src_root: &Path,
    dst_root: &Path,
    relative: &Path,
    filter: &FileFilter,
    moved: &mut Vec<PathBuf>,
) -> Result<()> {
    for name in sorted_children(&src_root.join(relative))? {
        let child = relative.join(&name);
        let src = src_root.join(&child);
        let dst = dst_root.join(&child);
        match filter.decide(&child) {
            Decision::Reject => {}
            Decision::Descend if src.is_dir() => {
                fs::create_dir_all(&dst)
                    .with_context(|| format!("failed to create {}", dst.display()))?;
                move_level(src_root, dst_root, &child, filter, moved)?;
            }
            _ => {
                remove_path_if_exists(&dst)?;
                move_path(&src, &dst)?;
                moved.push(child);
            }
        }
    }
    Ok(())
}

/// Deletes every entry of `root` the filter takes. Returns how many entries went.
pub fn purge_filtered(root: &Path, filter: &FileFilter) -> Result<usize> {
    purge_level(root, Path::new(""), filter)
}

fn purge_level(root: &Path, relative: &Path, filter: &FileFilter) -> Result<usize> {
    let mut purged = 0;
    for name in sorted_children(&root.join(relative))? {
        let child = relative.join(&name);
        let path = root.join(&child);
        match filter.decide(&child) {
            Decision::Reject => {}
            Decision::Descend if path.is_dir() => purged += purge_level(root, &child, filter)?,
            _ => {
                remove_path_if_exists(&path)?;
                purged += 1;
            }
        }
    }
    Ok(purged)
}

/// Deletes every entry of `root` the filter rejects.
pub fn prune_rejected(root: &Path, filter: &FileFilter) -> Result<()> {
    prune_level(root, Path::new(""), filter)
}

fn prune_level(root: &Path, relative: &Path, filter: &FileFilter) -> Result<()> {
    for name in sorted_children(&root.join(relative))? {
        let child = relative.join(&name);
        let path = root.join(&child);
        match filter.decide(&child) {
            Decision::Reject => remove_path_if_exists(&path)?,
            Decision::Descend if path.is_dir() => prune_level(root, &child, filter)?,
            _ => {}
        }
    }
    Ok(())
}

/// Moves `src` onto `dst`, merging into directories that already exist.
///
/// Failures are collected rather than returned so one stuck entry does not stop the
/// rest from coming back. Returns how many entries were moved.
pub fn merge_move(src: &Path, dst: &Path, failures: &mut Vec<String>) -> usize {
    if src.is_dir() && dst.is_dir() {
        let children = match sorted_children(src) {
            Ok(children) => children,
            Err(err) => {
                failures.push(format!("{err:#}"));
                return 0;
            }
        };
        let mut moved = 0;
        for name in children {
            moved += merge_move(&src.join(&name), &dst.join(&name), failures);
        }
        match is_dir_empty(src) {
            Ok(true) => {
                if let Err(err) = fs::remove_dir(src) {
                    failures.push(format!("failed to remove {}: {err}", src.display()));
                }
            }
            Ok(false) => {}
            Err(err) => failures.push(format!("{err:#}")),
        }
        return moved;
    }

    match remove_path_if_exists(dst).and_then(|_| move_path(src, dst)) {
        Ok(()) => 1,
        Err(err) => {
            warn!(source = %src.display(), target = %dst.display(), "restore move failed: {err:#}");
            failures.push(format!(
                "could not move {} back to {}: {err:#}",
                src.display(),
                dst.display()
            ));
            0
        }
    }
}

/// Copies entries of `src` missing from `dst`, descending into directories both
/// sides have. Top-level names in `skip` are left alone.
pub fn copy_missing(src: &Path, dst: &Path, skip: &[&str]) -> Result<usize> {
    if !src.is_dir() {
        return Ok(0);
    }
    let mut copied = 0;
    for name in sorted_children(src)? {
        if skip.iter().any(|skipped| name == std::ffi::OsStr::new(skipped)) {
            continue;
        }
        let from = src.join(&name);
        let to = dst.join(&name);
        if !to.exists() {
            copy_path(&from, &to)?;
            copied += 1;
        } else if from.is_dir() && to.is_dir() {
            copied += copy_missing(&from, &to, &[])?;
        }
    }
    Ok(copied)
}
