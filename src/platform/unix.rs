//! Unix process signals and elevation fallbacks

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};

/// Send SIGTERM to a process
pub fn terminate_process(pid: u32) -> Result<()> {
    let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if result == 0 {
        Ok(())
    } else {
        anyhow::bail!("Failed to signal process {pid}")
    }
}

/// Send SIGKILL to a process
pub fn kill_process(pid: u32) -> Result<()> {
    let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
    if result == 0 {
        Ok(())
    } else {
        anyhow::bail!("Failed to kill process {pid}")
    }
}

/// Root is the only privilege level above a normal user here
pub fn is_elevated() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// There is no graphical consent prompt at this boundary on Unix
pub fn spawn_elevated(_exe: &Path, _args: &[String]) -> Result<()> {
    anyhow::bail!("Elevated relaunch is not supported on this platform")
}

/// Without a consent prompt the helper runs at the caller's own privilege
/// level; the exit-code contract is unchanged.
pub fn run_elevated(exe: &Path, args: &[String]) -> Result<i32> {
    let status = Command::new(exe)
        .args(args)
        .status()
        .context("Failed to launch helper process")?;
    Ok(status.code().unwrap_or(1))
}
