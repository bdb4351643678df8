//! clashdesk - Supervisor for a locally-run Clash/Mihomo proxy core
//!
//! Manages the core's lifecycle, materializes subscription profiles into its
//! runtime config, and keeps the wintun driver file in the right place. The
//! same binary doubles as the elevated helper: `clashdesk --driver <op> <dir>`
//! performs one driver file operation and reports through its exit code.

#![allow(dead_code)] // Several API methods are part of a comprehensive public API

mod api;
mod core;
mod platform;

use std::process::ExitCode;
use std::sync::Arc;

use single_instance::SingleInstance;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::core::app::{App, STATUS_POLL_INTERVAL};
use crate::core::driver::DriverOp;
use crate::core::elevation::{self, HELPER_SENTINEL};
use crate::core::{driver, ProfileStore};

/// Application name constant
pub const APP_NAME: &str = "clashdesk";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> ExitCode {
    // Initialize logging
    init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some(HELPER_SENTINEL) {
        return ExitCode::from(run_helper_mode(&args[1..]));
    }

    info!("{} v{} starting...", APP_NAME, APP_VERSION);

    // Ensure only one supervisor is running; two would fight over the core
    let instance = match SingleInstance::new(APP_NAME) {
        Ok(instance) => instance,
        Err(e) => {
            error!("failed to create single instance lock: {e}");
            return ExitCode::FAILURE;
        }
    };
    if !instance.is_single() {
        error!("another instance of {} is already running", APP_NAME);
        return ExitCode::FAILURE;
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    let store = ProfileStore::from_exe_dir()?;

    // Driver file maintenance needs admin rights, so when a driver is managed
    // the whole app runs elevated. Declining the prompt keeps it running
    // unelevated with TUN features degraded.
    if driver::is_present(&store.resolved_config_dir()) && !elevation::is_elevated() {
        if elevation::relaunch_elevated() {
            info!("continuing in elevated process");
            return Ok(());
        }
        warn!("running without elevation, driver maintenance may fail");
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let app = Arc::new(App::new(store)?);
        app.init().await;

        // Forward core output into our own log stream
        let mut output = app.supervisor().subscribe_output();
        tokio::spawn(async move {
            loop {
                match output.recv().await {
                    Ok(line) => debug!(target: "clashdesk::core_output", "{line}"),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!("core output lagged, {missed} lines dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        loop {
            tokio::select! {
                _ = tokio::time::sleep(STATUS_POLL_INTERVAL) => {
                    app.check_status().await;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        app.cleanup().await;
        Ok(())
    })
}

/// Elevated helper mode: perform one driver file operation and exit.
///
/// The exit code is the only channel back to the unelevated parent, so it
/// carries the whole result: 0 on success, 1 on any failure.
fn run_helper_mode(args: &[String]) -> u8 {
    let Some(op) = args.first().and_then(|a| DriverOp::parse(a)) else {
        error!("helper mode: unknown operation {:?}", args.first());
        return 1;
    };
    let Some(dir) = args.get(1).filter(|d| !d.is_empty()) else {
        error!("helper mode: missing target directory");
        return 1;
    };
    let dir = std::path::PathBuf::from(dir);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("helper mode: failed to start runtime: {e}");
            return 1;
        }
    };
    info!("helper mode: {} in {}", op.as_arg(), dir.display());
    if runtime.block_on(op.run(&dir)) {
        0
    } else {
        1
    }
}

/// Initialize the logging system
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("clashdesk=info,reqwest=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helper_mode_rejects_bad_arguments() {
        assert_eq!(run_helper_mode(&[]), 1);
        assert_eq!(run_helper_mode(&["explode".into()]), 1);
        assert_eq!(run_helper_mode(&["install".into()]), 1);
        assert_eq!(run_helper_mode(&["install".into(), String::new()]), 1);
    }

    #[test]
    fn helper_mode_runs_a_file_operation() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(driver::DRIVER_FILE);
        std::fs::write(&path, b"payload").unwrap();

        let args = vec![
            "disable".to_string(),
            dir.path().to_string_lossy().into_owned(),
        ];
        assert_eq!(run_helper_mode(&args), 0);
        assert!(!path.exists());

        // Nothing left to disable, so the same call now fails
        assert_eq!(run_helper_mode(&args), 1);
    }
}
