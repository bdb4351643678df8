//! Core process supervision - owns the single proxy-core child process
//!
//! At most one core process is ever alive under this supervisor. `start` on a
//! live core is a no-op returning success; `stop` is idempotent and always
//! clears the handle, so a failed teardown can never wedge a later start.
//! Local process liveness is deliberately separate from control-plane
//! reachability: the two can disagree while the core is booting its API.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::platform;

/// How long `stop` waits for the core to exit before force-killing it
const STOP_WAIT: Duration = Duration::from_secs(5);
/// Poll interval for the exit watcher and the bounded stop wait
const EXIT_POLL: Duration = Duration::from_millis(200);

struct CoreState {
    child: Option<Child>,
    /// Bumped on every start and stop so a stale exit watcher can tell that
    /// the process it was watching is no longer the supervised one
    generation: u64,
}

/// Supervises the proxy-core child process
pub struct CoreSupervisor {
    state: Arc<Mutex<CoreState>>,
    output_tx: broadcast::Sender<String>,
    liveness_tx: watch::Sender<bool>,
}

impl CoreSupervisor {
    pub fn new() -> Self {
        let (output_tx, _) = broadcast::channel(256);
        let (liveness_tx, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(CoreState {
                child: None,
                generation: 0,
            })),
            output_tx,
            liveness_tx,
        }
    }

    /// Captured stdout/stderr of the core, one line per message
    pub fn subscribe_output(&self) -> broadcast::Receiver<String> {
        self.output_tx.subscribe()
    }

    /// Local process liveness; flips to false once the exit is observed
    pub fn liveness(&self) -> watch::Receiver<bool> {
        self.liveness_tx.subscribe()
    }

    /// Start the core with `-d <config_dir>` and output capture.
    ///
    /// Returns true if the core is running afterwards, including the no-op
    /// case where it already was. Returns false (without panicking) when the
    /// executable is missing or the spawn fails.
    pub fn start(&self, core_path: &Path, config_dir: &Path) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };

        if let Some(child) = state.child.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                debug!("core already running, start is a no-op");
                return true;
            }
            // Stale handle from an exit nobody observed yet
            state.child = None;
        }

        if !core_path.exists() {
            warn!("core executable not found: {}", core_path.display());
            return false;
        }

        let mut command = Command::new(core_path);
        command
            .arg("-d")
            .arg(config_dir)
            .current_dir(config_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(0x08000000); // CREATE_NO_WINDOW
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("failed to spawn core process: {e}");
                return false;
            }
        };

        info!(
            "started core process (pid {}) from {}",
            child.id(),
            core_path.display()
        );

        if let Some(stdout) = child.stdout.take() {
            spawn_output_reader(stdout, self.output_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_output_reader(stderr, self.output_tx.clone());
        }

        state.generation += 1;
        let generation = state.generation;
        state.child = Some(child);
        drop(state);

        self.liveness_tx.send_replace(true);
        self.spawn_exit_watcher(generation);
        true
    }

    /// Stop the core if it is running. Idempotent: calling it without a live
    /// core is a no-op. Attempts graceful termination first, force-kills on
    /// timeout, and always drops the handle so a later `start` is never
    /// blocked by a stale reference.
    pub fn stop(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.generation += 1;
        let Some(mut child) = state.child.take() else {
            return;
        };

        let pid = child.id();
        debug!("stopping core process (pid {pid})");
        if let Err(e) = platform::terminate_process(pid) {
            debug!("graceful termination failed: {e}");
            let _ = platform::kill_process(pid);
        }

        let deadline = Instant::now() + STOP_WAIT;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!("core process stopped ({status})");
                    break;
                }
                Ok(None) if Instant::now() < deadline => std::thread::sleep(EXIT_POLL),
                other => {
                    if let Err(e) = other {
                        warn!("error waiting for core exit: {e}");
                    }
                    let _ = platform::kill_process(pid);
                    let _ = child.wait();
                    info!("core process force-killed");
                    break;
                }
            }
        }

        // Keep the state lock until the teardown is done so a concurrent
        // start cannot create a second live process mid-kill
        drop(state);
        self.liveness_tx.send_replace(false);
    }

    /// `stop` then `start`; a crash in between leaves the core stopped,
    /// never double-started
    pub fn restart(&self, core_path: &Path, config_dir: &Path) -> bool {
        self.stop();
        self.start(core_path, config_dir)
    }

    /// Whether a non-exited child handle exists right now
    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .map(|mut state| {
                state
                    .child
                    .as_mut()
                    .map(|child| matches!(child.try_wait(), Ok(None)))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    fn spawn_exit_watcher(&self, generation: u64) {
        let state = Arc::clone(&self.state);
        let liveness = self.liveness_tx.clone();
        std::thread::spawn(move || loop {
            std::thread::sleep(EXIT_POLL);
            let Ok(mut guard) = state.lock() else {
                return;
            };
            if guard.generation != generation {
                // A stop or restart superseded the process we were watching
                return;
            }
            let Some(child) = guard.child.as_mut() else {
                return;
            };
            match child.try_wait() {
                Ok(None) => {}
                Ok(Some(status)) => {
                    info!("core process exited ({status})");
                    guard.child = None;
                    guard.generation += 1;
                    drop(guard);
                    liveness.send_replace(false);
                    return;
                }
                Err(e) => {
                    warn!("lost track of core process: {e}");
                    guard.child = None;
                    guard.generation += 1;
                    drop(guard);
                    liveness.send_replace(false);
                    return;
                }
            }
        });
    }
}

impl Default for CoreSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_output_reader<R: Read + Send + 'static>(stream: R, tx: broadcast::Sender<String>) {
    std::thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            // No subscribers is fine; the line is simply dropped
            let _ = tx.send(line);
        }
    });
}
