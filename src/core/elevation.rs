//! Elevation gateway
//!
//! Driver files in Program Files need administrator rights to touch. Two
//! paths exist: relaunch the whole app elevated at startup (when a driver
//! file is already present), or re-exec just the helper mode elevated for a
//! single driver operation. The helper reports through its exit code only;
//! no pipe or socket IPC crosses the privilege boundary.

use std::path::Path;

use tracing::{debug, warn};

use super::driver::DriverOp;
use crate::platform;

/// First argument that switches the binary into elevated helper mode
pub const HELPER_SENTINEL: &str = "--driver";

pub fn is_elevated() -> bool {
    platform::is_elevated()
}

/// Relaunch the current executable with elevation and no arguments.
///
/// Returns true when the elevated copy was launched, meaning this process
/// should exit. A declined UAC prompt returns false and the caller keeps
/// running unelevated.
pub fn relaunch_elevated() -> bool {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            warn!("cannot determine own executable path: {e}");
            return false;
        }
    };
    match platform::spawn_elevated(&exe, &[]) {
        Ok(()) => {
            debug!("elevated relaunch started");
            true
        }
        Err(e) => {
            warn!("elevated relaunch declined or failed: {e}");
            false
        }
    }
}

/// Run one driver operation through an elevated copy of this binary.
///
/// The helper is invoked as `<exe> --driver <op> <dir>` and its exit code is
/// the whole result: zero is success, anything else (including a declined
/// UAC prompt) is failure.
pub async fn run_privileged_driver_op(op: DriverOp, dir: &Path) -> bool {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            warn!("cannot determine own executable path: {e}");
            return false;
        }
    };
    let args = vec![
        HELPER_SENTINEL.to_string(),
        op.as_arg().to_string(),
        dir.to_string_lossy().into_owned(),
    ];
    let code = tokio::task::spawn_blocking(move || platform::run_elevated(&exe, &args))
        .await
        .unwrap_or_else(|e| Err(anyhow::anyhow!("helper task panicked: {e}")));
    match code {
        Ok(0) => true,
        Ok(code) => {
            warn!("elevated helper exited with code {code}");
            false
        }
        Err(e) => {
            warn!("elevated helper failed to run: {e}");
            false
        }
    }
}
