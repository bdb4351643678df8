//! Application state and orchestration
//!
//! Ties the supervisor, profile store, control-plane client and reload
//! coordinator together behind the handful of operations the main loop and
//! shutdown path call. Observed liveness is deliberately wider than "we hold
//! a child handle": a core answering on the control plane counts as running
//! even if someone else launched it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::driver::{self, DriverOp};
use super::elevation;
use super::profile::ProfileStore;
use super::reload::ReloadCoordinator;
use super::supervisor::CoreSupervisor;
use crate::api::ControlPlaneClient;
use crate::platform;

/// How often the main loop refreshes observed liveness
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Pause after a driver file swap before restarting the core
const TOGGLE_SETTLE: Duration = Duration::from_millis(300);
/// Pause after stopping the core before touching its driver file
const DRIVER_STOP_SETTLE: Duration = Duration::from_millis(500);

pub struct App {
    supervisor: Arc<CoreSupervisor>,
    profiles: Arc<Mutex<ProfileStore>>,
    api: Arc<ControlPlaneClient>,
    reload: ReloadCoordinator,
    core_running: AtomicBool,
    core_version: RwLock<Option<String>>,
    cleaned: AtomicBool,
}

impl App {
    pub fn new(store: ProfileStore) -> Result<Self> {
        let api = Arc::new(ControlPlaneClient::new(
            &store.config().api_url,
            &store.config().api_secret,
        )?);
        let supervisor = Arc::new(CoreSupervisor::new());
        let profiles = Arc::new(Mutex::new(store));
        let reload = ReloadCoordinator::new(
            Arc::clone(&supervisor),
            Arc::clone(&profiles),
            Arc::clone(&api),
        );
        Ok(Self {
            supervisor,
            profiles,
            api,
            reload,
            core_running: AtomicBool::new(false),
            core_version: RwLock::new(None),
            cleaned: AtomicBool::new(false),
        })
    }

    pub fn supervisor(&self) -> &Arc<CoreSupervisor> {
        &self.supervisor
    }

    pub fn profiles(&self) -> &Arc<Mutex<ProfileStore>> {
        &self.profiles
    }

    pub fn api(&self) -> &Arc<ControlPlaneClient> {
        &self.api
    }

    /// Startup sequence: reset the system proxy, make sure a loadable config
    /// exists, then start the core when configured to.
    pub async fn init(&self) {
        // A previous crash may have left the system proxy pointing at a dead
        // port, so it always starts cleared
        if let Err(e) = platform::clear_system_proxy() {
            warn!("failed to clear system proxy: {e}");
        }
        {
            let mut store = self.profiles.lock().await;
            store.config_mut().set_system_proxy = false;
            if let Err(e) = store.save() {
                warn!("failed to persist settings: {e}");
            }
            if let Err(e) = store.ensure_minimal_config() {
                warn!("failed to write bootstrap config: {e}");
            }
        }

        let auto_start = self.profiles.lock().await.config().auto_start_core;
        if auto_start {
            self.start_core().await;
            self.reload.wait_for_control_plane().await;
        }
        self.check_status().await;
    }

    pub async fn start_core(&self) -> bool {
        if self.reload.is_reloading() {
            debug!("ignoring start request during reload");
            return false;
        }
        let (core_path, config_dir) = {
            let store = self.profiles.lock().await;
            (store.resolved_core_path(), store.resolved_config_dir())
        };
        let supervisor = Arc::clone(&self.supervisor);
        tokio::task::spawn_blocking(move || supervisor.start(&core_path, &config_dir))
            .await
            .unwrap_or(false)
    }

    pub async fn stop_core(&self) {
        if self.reload.is_reloading() {
            debug!("ignoring stop request during reload");
            return;
        }
        let supervisor = Arc::clone(&self.supervisor);
        let _ = tokio::task::spawn_blocking(move || supervisor.stop()).await;
        self.core_running.store(false, Ordering::Release);
    }

    /// Materialize the selected profile and restart the core onto it
    pub async fn reload_core_config(&self) -> bool {
        let reloaded = self.reload.reload().await;
        self.check_status().await;
        reloaded
    }

    pub fn is_reloading(&self) -> bool {
        self.reload.is_reloading()
    }

    /// Refresh observed liveness and the reported core version.
    ///
    /// Running means the control plane answers or we hold a live child; an
    /// externally launched core on the configured port therefore counts.
    pub async fn check_status(&self) {
        let version = self.api.version().await;
        let running = version.is_some() || self.supervisor.is_running();
        self.core_running.store(running, Ordering::Release);
        let mut slot = self
            .core_version
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if version.is_some() || !running {
            *slot = version;
        }
    }

    pub fn is_core_running(&self) -> bool {
        self.core_running.load(Ordering::Acquire)
    }

    pub fn core_version(&self) -> Option<String> {
        self.core_version
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Shutdown path, safe to call more than once: the first caller restores
    /// the system proxy and stops the core, later callers do nothing.
    pub async fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::AcqRel) {
            return;
        }
        let proxied = self.profiles.lock().await.config().set_system_proxy;
        if proxied {
            if let Err(e) = platform::clear_system_proxy() {
                warn!("failed to clear system proxy on exit: {e}");
            }
        }
        let supervisor = Arc::clone(&self.supervisor);
        let _ = tokio::task::spawn_blocking(move || supervisor.stop()).await;
        info!("shutdown complete");
    }

    pub async fn set_system_proxy_enabled(&self, enabled: bool) -> bool {
        let (port, result) = {
            let store = self.profiles.lock().await;
            let port = store.config().mixed_port;
            let result = if enabled {
                platform::set_system_proxy("127.0.0.1", port)
            } else {
                platform::clear_system_proxy()
            };
            (port, result)
        };
        match result {
            Ok(()) => {
                let mut store = self.profiles.lock().await;
                store.config_mut().set_system_proxy = enabled;
                if let Err(e) = store.save() {
                    warn!("failed to persist settings: {e}");
                }
                if enabled {
                    info!("system proxy set to 127.0.0.1:{port}");
                } else {
                    info!("system proxy cleared");
                }
                true
            }
            Err(e) => {
                warn!("system proxy change failed: {e}");
                false
            }
        }
    }

    /// Switch the proxy mode (rule / global / direct) on the running core
    pub async fn set_mode(&self, mode: &str) -> bool {
        self.api
            .patch_configs(&serde_json::json!({ "mode": mode }))
            .await
    }

    /// Directory the driver file lives in: the core's working directory,
    /// which the launch contract fixes to the config dir
    async fn driver_dir(&self) -> PathBuf {
        self.profiles.lock().await.resolved_config_dir()
    }

    /// Run a driver file operation, falling back to the elevated helper when
    /// the direct attempt fails without admin rights
    async fn run_driver_op(&self, op: DriverOp, dir: &std::path::Path) -> bool {
        if op.run(dir).await {
            return true;
        }
        if !elevation::is_elevated() {
            info!("retrying driver {} through elevated helper", op.as_arg());
            return elevation::run_privileged_driver_op(op, dir).await;
        }
        false
    }

    /// Toggle TUN mode by parking or restoring the driver file.
    ///
    /// Enabling on a running core restarts it around the file swap so the
    /// core picks the driver up. Disabling stops the core first and leaves it
    /// stopped; the caller decides when it comes back.
    pub async fn set_tun_enabled(&self, enabled: bool) -> bool {
        let dir = self.driver_dir().await;
        let was_running = self.supervisor.is_running();

        let changed = if enabled {
            if driver::is_present(&dir) {
                true
            } else if driver::is_disabled(&dir) {
                if was_running {
                    self.stop_core().await;
                    tokio::time::sleep(TOGGLE_SETTLE).await;
                }
                let restored = self.run_driver_op(DriverOp::Enable, &dir).await;
                if was_running {
                    tokio::time::sleep(TOGGLE_SETTLE).await;
                    self.start_core().await;
                }
                restored
            } else {
                warn!("no driver file available, install it first");
                false
            }
        } else {
            if was_running {
                self.stop_core().await;
                tokio::time::sleep(TOGGLE_SETTLE).await;
            }
            if driver::is_present(&dir) {
                self.run_driver_op(DriverOp::Disable, &dir).await
            } else {
                true
            }
        };

        if changed {
            let mut store = self.profiles.lock().await;
            store.config_mut().tun_enabled = enabled;
            if let Err(e) = store.save() {
                warn!("failed to persist settings: {e}");
            }
        }
        changed
    }

    /// Make a driver file available, preferring a previously parked copy over
    /// a fresh download. The core is stopped around the swap and restarted
    /// afterwards when it was running.
    pub async fn install_driver(&self) -> bool {
        let dir = self.driver_dir().await;
        if driver::is_present(&dir) {
            return true;
        }

        let was_running = self.supervisor.is_running();
        if was_running {
            self.stop_core().await;
            tokio::time::sleep(DRIVER_STOP_SETTLE).await;
        }

        let installed = if driver::is_disabled(&dir) {
            self.run_driver_op(DriverOp::Enable, &dir).await
        } else {
            self.run_driver_op(DriverOp::Install, &dir).await
        };

        if installed {
            let mut store = self.profiles.lock().await;
            store.config_mut().tun_enabled = true;
            if let Err(e) = store.save() {
                warn!("failed to persist settings: {e}");
            }
        }
        if was_running {
            self.start_core().await;
        }
        installed
    }

    /// Park the driver file rather than deleting it, so a later install is a
    /// rename instead of a download
    pub async fn uninstall_driver(&self) -> bool {
        let dir = self.driver_dir().await;
        if !driver::is_present(&dir) {
            return true;
        }

        let was_running = self.supervisor.is_running();
        if was_running {
            self.stop_core().await;
            tokio::time::sleep(DRIVER_STOP_SETTLE).await;
        }

        let parked = self.run_driver_op(DriverOp::Disable, &dir).await;
        if parked {
            let mut store = self.profiles.lock().await;
            store.config_mut().tun_enabled = false;
            if let Err(e) = store.save() {
                warn!("failed to persist settings: {e}");
            }
        }
        if was_running {
            self.start_core().await;
        }
        parked
    }
}
