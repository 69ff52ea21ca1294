use std::cell::Cell;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use dsupgrade_core::{BuildIdentifier, BuildInfo, PackageFormat, UpgradeError};
use flate2::read::GzDecoder;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::filter::FileFilter;
use crate::fs_utils::{copy_dir_recursive, sorted_children};
use crate::layout::InstallationLayout;
use crate::tree::{move_filtered, prune_rejected};

const REQUIRED_STAGE_PATHS: &[&str] = &[
    "bin",
    "lib",
    "config",
    "config/config.ldif",
    "config/schema",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageValidity {
    Valid,
    Invalid(String),
}

/// A validated candidate build extracted under the instance's temporary directory.
#[derive(Debug, Clone)]
pub struct Stage {
    directory: PathBuf,
    build_info: BuildInfo,
    candidate: BuildIdentifier,
}

impl Stage {
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn build_info(&self) -> &BuildInfo {
        &self.build_info
    }

    pub fn candidate(&self) -> &BuildIdentifier {
        &self.candidate
    }

    /// The stage laid out as a combined installation.
    pub fn layout(&self) -> InstallationLayout {
        InstallationLayout::combined(self.directory.clone())
    }
}

pub fn check_stage(stage_dir: &Path) -> StageValidity {
    match inspect_stage(stage_dir) {
        Ok(_) => StageValidity::Valid,
        Err(reason) => StageValidity::Invalid(reason),
    }
}

pub fn validate_stage(stage_dir: &Path) -> Result<Stage> {
    let (build_info, candidate) = inspect_stage(stage_dir).map_err(UpgradeError::InvalidPackage)?;
    info!(stage = %stage_dir.display(), candidate = %candidate, "stage validated");
    Ok(Stage {
        directory: stage_dir.to_path_buf(),
        build_info,
        candidate,
    })
}

fn inspect_stage(stage_dir: &Path) -> std::result::Result<(BuildInfo, BuildIdentifier), String> {
    if !stage_dir.is_dir() {
        return Err(format!("{} is not a directory", stage_dir.display()));
    }
    for required in REQUIRED_STAGE_PATHS {
        if !stage_dir.join(required).exists() {
            return Err(format!("'{required}' is missing from {}", stage_dir.display()));
        }
    }

    let layout = InstallationLayout::combined(stage_dir);
    let build_info =
        BuildInfo::read(&layout.buildinfo_path()).map_err(|err| format!("{err:#}"))?;
    let candidate = build_info.identifier().map_err(|err| format!("{err:#}"))?;

    for baseline in [
        layout.config_baseline_path(candidate.stamp()),
        layout.schema_baseline_path(candidate.stamp()),
    ] {
        if !baseline.is_file() {
            return Err(format!(
                "baseline {} is missing from the package",
                baseline.display()
            ));
        }
    }
    Ok((build_info, candidate))
}

/// Unpacks an archive into `destination`, reporting a completion ratio in `0.0..=1.0`.
///
/// A single wrapper directory at the archive root is flattened away. On error the
/// caller removes whatever was written.
pub fn extract_package(
    archive_path: &Path,
    destination: &Path,
    format: PackageFormat,
    filter: Option<&FileFilter>,
    on_ratio: &mut dyn FnMut(f64),
) -> Result<()> {
    fs::create_dir_all(destination)
        .with_context(|| format!("failed to create {}", destination.display()))?;
    info!(
        archive = %archive_path.display(),
        format = format.as_str(),
        "extracting package"
    );

    match format {
        PackageFormat::Zip => extract_zip(archive_path, destination, on_ratio)?,
        PackageFormat::TarGz => extract_tar_gz(archive_path, destination, on_ratio)?,
    }
    collapse_single_root(destination)?;
    if let Some(filter) = filter {
        prune_rejected(destination, filter)?;
    }
    on_ratio(1.0);
    Ok(())
}

pub fn copy_package_dir(source: &Path, destination: &Path) -> Result<()> {
    if !source.is_dir() {
        return Err(UpgradeError::InvalidPackage(format!(
            "{} is not a directory",
            source.display()
        ))
        .into());
    }
    copy_dir_recursive(source, destination)
}

/// Moves the staged tree into `target_dir`. Whatever the filter rejects stays where it is
/// on both sides.
pub fn move_into(stage_dir: &Path, target_dir: &Path, filter: &FileFilter) -> Result<Vec<PathBuf>> {
    let moved = move_filtered(stage_dir, target_dir, filter).map_err(|err| {
        UpgradeError::FileSystemAccess(format!(
            "failed moving {} into {}: {err:#}",
            stage_dir.display(),
            target_dir.display()
        ))
    })?;
    debug!(
        side = filter.side().as_str(),
        entries = moved.len(),
        "stage moved into {}",
        target_dir.display()
    );
    Ok(moved)
}

fn extract_zip(archive_path: &Path, dst: &Path, on_ratio: &mut dyn FnMut(f64)) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("failed to open archive {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("failed to read zip archive {}", archive_path.display()))?;
    let total = archive.len().max(1);

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).with_context(|| {
            format!("failed to read entry {index} of {}", archive_path.display())
        })?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(anyhow!(
                "zip entry '{}' escapes the extraction directory",
                entry.name()
            ));
        };
        let out_path = dst.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .with_context(|| format!("failed to create {}", out_path.display()))?;
        } else {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let mut out = File::create(&out_path)
                .with_context(|| format!("failed to create {}", out_path.display()))?;
            io::copy(&mut entry, &mut out)
                .with_context(|| format!("failed to extract {}", out_path.display()))?;

            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode)).with_context(
                    || format!("failed to set permissions on {}", out_path.display()),
                )?;
            }
        }
        on_ratio((index + 1) as f64 / total as f64);
    }
    Ok(())
}

struct CountingReader<R> {
    inner: R,
    consumed: Rc<Cell<u64>>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.consumed.set(self.consumed.get() + read as u64);
        Ok(read)
    }
}

fn extract_tar_gz(archive_path: &Path, dst: &Path, on_ratio: &mut dyn FnMut(f64)) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("failed to open archive {}", archive_path.display()))?;
    let total = file
        .metadata()
        .with_context(|| format!("failed to stat {}", archive_path.display()))?
        .len()
        .max(1);
    let consumed = Rc::new(Cell::new(0));
    let reader = CountingReader {
        inner: file,
        consumed: Rc::clone(&consumed),
    };
    let mut archive = tar::Archive::new(GzDecoder::new(reader));

    let entries = archive
        .entries()
        .with_context(|| format!("failed to read tar archive {}", archive_path.display()))?;
    for entry in entries {
        let mut entry = entry
            .with_context(|| format!("failed to read entry of {}", archive_path.display()))?;
        let name = entry
            .path()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        let unpacked = entry
            .unpack_in(dst)
            .with_context(|| format!("failed to extract '{name}'"))?;
        if !unpacked {
            return Err(anyhow!(
                "tar entry '{name}' escapes the extraction directory"
            ));
        }
        on_ratio((consumed.get() as f64 / total as f64).min(1.0));
    }
    Ok(())
}

fn collapse_single_root(destination: &Path) -> Result<()> {
    let children = sorted_children(destination)?;
    if children.len() != 1 || destination.join("bin").exists() {
        return Ok(());
    }
    let wrapper = destination.join(&children[0]);
    if !wrapper.is_dir() {
        return Ok(());
    }

    let parked = destination.join(".package-root");
    fs::rename(&wrapper, &parked)
        .with_context(|| format!("failed to rename {}", wrapper.display()))?;
    for name in sorted_children(&parked)? {
        let from = parked.join(&name);
        let to = destination.join(&name);
        fs::rename(&from, &to)
            .with_context(|| format!("failed to move {} to {}", from.display(), to.display()))?;
    }
    fs::remove_dir(&parked).with_context(|| format!("failed to remove {}", parked.display()))
}
