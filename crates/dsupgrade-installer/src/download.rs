use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use dsupgrade_core::UpgradeError;
use sha2::{Digest, Sha256};
use tracing::info;

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn sha256_file_hex(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buf)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn verify_sha256_file(path: &Path, expected_hex: &str) -> Result<()> {
    let actual = sha256_file_hex(path)?;
    if actual.eq_ignore_ascii_case(expected_hex.trim()) {
        return Ok(());
    }
    Err(UpgradeError::InvalidPackage(format!(
        "sha256 mismatch for {}: expected {}, got {}",
        path.display(),
        expected_hex.trim(),
        actual
    ))
    .into())
}

/// Streams `url` into `destination`, reporting a ratio when the size is known.
pub fn download_package(
    url: &str,
    destination: &Path,
    expected_sha256: Option<&str>,
    on_ratio: &mut dyn FnMut(f64),
) -> Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    info!(url, destination = %destination.display(), "downloading package");

    let client = reqwest::blocking::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("failed to request {url}"))?
        .error_for_status()
        .map_err(|err| anyhow!("download of {url} failed: {err}"))?;
    let total = response.content_length();

    let mut file = File::create(destination)
        .with_context(|| format!("failed to create {}", destination.display()))?;
    let mut received: u64 = 0;
    let mut buf = [0_u8; 64 * 1024];
    loop {
        let read = response
            .read(&mut buf)
            .with_context(|| format!("failed reading response body of {url}"))?;
        if read == 0 {
            break;
        }
        file.write_all(&buf[..read])
            .with_context(|| format!("failed to write {}", destination.display()))?;
        received += read as u64;
        if let Some(total) = total.filter(|total| *total > 0) {
            on_ratio((received as f64 / total as f64).min(1.0));
        }
    }
    file.flush()
        .with_context(|| format!("failed to flush {}", destination.display()))?;

    if let Some(expected) = expected_sha256 {
        verify_sha256_file(destination, expected)?;
    }
    on_ratio(1.0);
    Ok(())
}
