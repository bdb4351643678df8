//! Platform-specific privilege, process and system-proxy primitives

#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub mod unix;

use std::path::Path;

use anyhow::Result;

/// Ask a process to terminate gracefully
pub fn terminate_process(pid: u32) -> Result<()> {
    #[cfg(windows)]
    {
        windows::terminate_process(pid)
    }
    #[cfg(unix)]
    {
        unix::terminate_process(pid)
    }
    #[cfg(not(any(windows, unix)))]
    {
        let _ = pid;
        anyhow::bail!("Unsupported platform")
    }
}

/// Force kill a process
pub fn kill_process(pid: u32) -> Result<()> {
    #[cfg(windows)]
    {
        windows::kill_process(pid)
    }
    #[cfg(unix)]
    {
        unix::kill_process(pid)
    }
    #[cfg(not(any(windows, unix)))]
    {
        let _ = pid;
        anyhow::bail!("Unsupported platform")
    }
}

/// Check whether the current process holds administrative privilege
pub fn is_elevated() -> bool {
    #[cfg(windows)]
    {
        windows::is_elevated()
    }
    #[cfg(unix)]
    {
        unix::is_elevated()
    }
    #[cfg(not(any(windows, unix)))]
    {
        false
    }
}

/// Launch an elevated copy of `exe` without waiting for it.
/// Fails when the user declines the consent prompt.
pub fn spawn_elevated(exe: &Path, args: &[String]) -> Result<()> {
    #[cfg(windows)]
    {
        windows::spawn_elevated(exe, args)
    }
    #[cfg(unix)]
    {
        unix::spawn_elevated(exe, args)
    }
    #[cfg(not(any(windows, unix)))]
    {
        let _ = (exe, args);
        anyhow::bail!("Unsupported platform")
    }
}

/// Launch an elevated copy of `exe` and wait for its exit code
pub fn run_elevated(exe: &Path, args: &[String]) -> Result<i32> {
    #[cfg(windows)]
    {
        windows::run_elevated(exe, args)
    }
    #[cfg(unix)]
    {
        unix::run_elevated(exe, args)
    }
    #[cfg(not(any(windows, unix)))]
    {
        let _ = (exe, args);
        anyhow::bail!("Unsupported platform")
    }
}

/// Point the OS proxy setting at `host:port`
pub fn set_system_proxy(host: &str, port: u16) -> Result<()> {
    #[cfg(windows)]
    {
        windows::set_system_proxy(host, port)
    }
    #[cfg(not(windows))]
    {
        let _ = (host, port);
        anyhow::bail!("System proxy toggling is not supported on this platform")
    }
}

/// Turn the OS proxy setting off
pub fn clear_system_proxy() -> Result<()> {
    #[cfg(windows)]
    {
        windows::clear_system_proxy()
    }
    #[cfg(not(windows))]
    {
        Ok(())
    }
}

