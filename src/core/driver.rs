//! Wintun driver file management
//!
//! TUN mode needs wintun.dll in the core's working directory. Rather than
//! deleting the file when TUN is switched off, it is parked under a
//! `.disabled` suffix
//! so re-enabling never re-downloads. All operations work on whatever
//! directory they are given; privilege handling lives in the elevation
//! module.

use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

pub const DRIVER_FILE: &str = "wintun.dll";
pub const DRIVER_FILE_DISABLED: &str = "wintun.dll.disabled";

const ARCHIVE_URL: &str = "https://www.wintun.net/builds/wintun-0.14.1.zip";
const ARCHIVE_ENTRY: &str = "wintun/bin/amd64/wintun.dll";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// The four file operations the elevated helper can be asked to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOp {
    Install,
    Uninstall,
    Disable,
    Enable,
}

impl DriverOp {
    pub fn as_arg(self) -> &'static str {
        match self {
            DriverOp::Install => "install",
            DriverOp::Uninstall => "uninstall",
            DriverOp::Disable => "disable",
            DriverOp::Enable => "enable",
        }
    }

    pub fn parse(arg: &str) -> Option<Self> {
        match arg {
            "install" => Some(DriverOp::Install),
            "uninstall" => Some(DriverOp::Uninstall),
            "disable" => Some(DriverOp::Disable),
            "enable" => Some(DriverOp::Enable),
            _ => None,
        }
    }

    pub async fn run(self, dir: &Path) -> bool {
        match self {
            DriverOp::Install => install(dir).await,
            DriverOp::Uninstall => uninstall(dir),
            DriverOp::Disable => disable(dir),
            DriverOp::Enable => enable(dir),
        }
    }
}

pub fn driver_path(dir: &Path) -> PathBuf {
    dir.join(DRIVER_FILE)
}

pub fn disabled_path(dir: &Path) -> PathBuf {
    dir.join(DRIVER_FILE_DISABLED)
}

/// An active driver file exists in `dir`
pub fn is_present(dir: &Path) -> bool {
    driver_path(dir).is_file()
}

/// A parked driver file exists in `dir`
pub fn is_disabled(dir: &Path) -> bool {
    disabled_path(dir).is_file()
}

/// Download the driver archive and extract the dll into `dir`.
///
/// Success is judged by the file existing afterwards, so an install over an
/// already-present driver refreshes it in place.
pub async fn install(dir: &Path) -> bool {
    match fetch_and_extract(dir).await {
        Ok(()) => {}
        Err(e) => warn!("driver install failed: {e:#}"),
    }
    is_present(dir)
}

async fn fetch_and_extract(dir: &Path) -> Result<()> {
    info!("downloading driver archive from {ARCHIVE_URL}");
    let client = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .context("failed to build http client")?;
    let response = client
        .get(ARCHIVE_URL)
        .send()
        .await
        .context("driver archive request failed")?;
    if !response.status().is_success() {
        bail!("driver archive request returned {}", response.status());
    }
    let bytes = response
        .bytes()
        .await
        .context("failed to read driver archive body")?;

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .context("driver archive is not a valid zip")?;
    let mut entry = archive
        .by_name(ARCHIVE_ENTRY)
        .with_context(|| format!("archive entry {ARCHIVE_ENTRY} not found"))?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let dest = driver_path(dir);
    let mut out = File::create(&dest)
        .with_context(|| format!("failed to create {}", dest.display()))?;
    std::io::copy(&mut entry, &mut out)
        .with_context(|| format!("failed to write {}", dest.display()))?;
    info!("driver installed at {}", dest.display());
    Ok(())
}

/// Remove the active driver file. Absent counts as removed.
pub fn uninstall(dir: &Path) -> bool {
    let path = driver_path(dir);
    if !path.exists() {
        return true;
    }
    if let Err(e) = std::fs::remove_file(&path) {
        warn!("failed to remove {}: {e}", path.display());
    }
    !path.exists()
}

/// Park the active driver under the disabled name.
///
/// Fails when there is no active file to park. A stale parked copy is
/// replaced; the active file we are parking is the authoritative one.
pub fn disable(dir: &Path) -> bool {
    let active = driver_path(dir);
    if !active.is_file() {
        warn!("no driver file to disable in {}", dir.display());
        return false;
    }
    let parked = disabled_path(dir);
    if parked.exists() {
        if let Err(e) = std::fs::remove_file(&parked) {
            warn!("failed to clear stale {}: {e}", parked.display());
        }
    }
    if let Err(e) = std::fs::rename(&active, &parked) {
        warn!("failed to disable driver: {e}");
    }
    !active.exists() && parked.is_file()
}

/// Restore a parked driver file to its active name
pub fn enable(dir: &Path) -> bool {
    let parked = disabled_path(dir);
    if !parked.is_file() {
        warn!("no disabled driver file to enable in {}", dir.display());
        return false;
    }
    let active = driver_path(dir);
    if active.exists() {
        if let Err(e) = std::fs::remove_file(&active) {
            warn!("failed to clear stale {}: {e}", active.display());
        }
    }
    if let Err(e) = std::fs::rename(&parked, &active) {
        warn!("failed to enable driver: {e}");
    }
    !parked.exists() && active.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FAKE_DLL: &[u8] = b"MZ\x90\x00fake driver payload";

    #[test]
    fn disable_then_enable_restores_bytes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(driver_path(dir.path()), FAKE_DLL).unwrap();

        assert!(disable(dir.path()));
        assert!(!is_present(dir.path()));
        assert!(is_disabled(dir.path()));

        assert!(enable(dir.path()));
        assert!(is_present(dir.path()));
        assert!(!is_disabled(dir.path()));
        assert_eq!(std::fs::read(driver_path(dir.path())).unwrap(), FAKE_DLL);
    }

    #[test]
    fn disable_without_active_file_fails_and_changes_nothing() {
        let dir = TempDir::new().unwrap();
        assert!(!disable(dir.path()));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn enable_without_parked_file_fails() {
        let dir = TempDir::new().unwrap();
        assert!(!enable(dir.path()));
    }

    #[test]
    fn disable_replaces_stale_parked_copy() {
        let dir = TempDir::new().unwrap();
        std::fs::write(disabled_path(dir.path()), b"stale").unwrap();
        std::fs::write(driver_path(dir.path()), FAKE_DLL).unwrap();

        assert!(disable(dir.path()));
        assert_eq!(std::fs::read(disabled_path(dir.path())).unwrap(), FAKE_DLL);
    }

    #[test]
    fn enable_replaces_stale_active_copy() {
        let dir = TempDir::new().unwrap();
        std::fs::write(driver_path(dir.path()), b"stale").unwrap();
        std::fs::write(disabled_path(dir.path()), FAKE_DLL).unwrap();

        assert!(enable(dir.path()));
        assert_eq!(std::fs::read(driver_path(dir.path())).unwrap(), FAKE_DLL);
    }

    #[test]
    fn uninstall_is_idempotent() {
        let dir = TempDir::new().unwrap();
        assert!(uninstall(dir.path()));
        std::fs::write(driver_path(dir.path()), FAKE_DLL).unwrap();
        assert!(uninstall(dir.path()));
        assert!(!is_present(dir.path()));
        assert!(uninstall(dir.path()));
    }

    #[test]
    fn op_args_round_trip() {
        for op in [
            DriverOp::Install,
            DriverOp::Uninstall,
            DriverOp::Disable,
            DriverOp::Enable,
        ] {
            assert_eq!(DriverOp::parse(op.as_arg()), Some(op));
        }
        assert_eq!(DriverOp::parse("reinstall"), None);
        assert_eq!(DriverOp::parse(""), None);
    }
}
