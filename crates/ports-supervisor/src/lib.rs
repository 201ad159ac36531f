//! Keeps track of which profiles have a live tunnel and owns the only path for
//! starting and stopping them.
//!
//! A single [`Supervisor`] is shared by every caller. The registry lock is held
//! only while the map is read or written; spawning, readiness probing and
//! signalling all happen outside it.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use ports_config::Profile;
use ports_ssh::{LogSink, SshError, SshProcessHandle, SshService};

mod log_buffer;

pub use log_buffer::{LogBuffer, MAX_LOG_LINES};

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("already running")]
    AlreadyRunning(String),
    #[error("not running")]
    NotRunning(String),
    #[error(transparent)]
    Ssh(#[from] SshError),
}

#[derive(Debug)]
enum Slot {
    /// Name reserved by a `start` that has not finished yet.
    Starting(u64),
    Running(SshProcessHandle),
}

type Registry = Arc<Mutex<HashMap<String, Slot>>>;

pub struct Supervisor {
    ssh: Arc<dyn SshService>,
    registry: Registry,
    logs: Arc<LogBuffer>,
    next_token: AtomicU64,
}

impl Supervisor {
    pub fn new(ssh: Arc<dyn SshService>) -> Self {
        Self {
            ssh,
            registry: Arc::new(Mutex::new(HashMap::new())),
            logs: Arc::new(LogBuffer::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Starts the tunnel for `profile` and returns its pid once it is ready.
    ///
    /// The name is reserved before the runner is called, so of two concurrent
    /// starts for one profile only the first reaches the runner. May take up
    /// to the readiness timeout.
    pub async fn start(&self, profile: &Profile) -> Result<u32, SupervisorError> {
        let reservation = self.reserve(&profile.name)?;
        self.logs.reset(&profile.name);

        // Dropping the reservation on error releases the name.
        let handle = self
            .ssh
            .start_tunnel(profile, self.log_sink(&profile.name))
            .await?;
        let pid = handle.pid();

        if let Err(e) = reservation.commit(handle.clone()) {
            warn!(
                "Tunnel '{}' was claimed by another start; stopping pid {}",
                profile.name, pid
            );
            if let Err(stop_err) = self.ssh.stop_tunnel(&handle) {
                warn!("Failed to stop orphaned tunnel '{}': {}", profile.name, stop_err);
            }
            return Err(e);
        }

        self.spawn_reaper(profile.name.clone(), handle);
        info!("Started tunnel '{}' (pid {})", profile.name, pid);
        Ok(pid)
    }

    /// Removes the entry for `name`, then signals its process group. The entry
    /// is gone even when signalling fails.
    pub fn stop(&self, name: &str) -> Result<(), SupervisorError> {
        let handle = {
            let mut registry = self.registry.lock();
            match registry.remove(name) {
                Some(Slot::Running(handle)) => handle,
                Some(starting) => {
                    registry.insert(name.to_string(), starting);
                    return Err(SupervisorError::NotRunning(name.to_string()));
                }
                None => return Err(SupervisorError::NotRunning(name.to_string())),
            }
        };

        info!("Stopping tunnel '{}' (pid {})", name, handle.pid());
        self.ssh.stop_tunnel(&handle)?;
        Ok(())
    }

    /// Best-effort shutdown of everything currently registered.
    pub fn stop_all(&self) {
        let drained = mem::take(&mut *self.registry.lock());

        for (name, slot) in drained {
            if let Slot::Running(handle) = slot {
                info!("Stopping tunnel '{}' (pid {})", name, handle.pid());
                if let Err(e) = self.ssh.stop_tunnel(&handle) {
                    warn!("Failed to stop tunnel '{}': {}", name, e);
                }
            }
        }
    }

    /// Pid of the registered tunnel. Not checked against the OS; the reaper
    /// clears entries shortly after their process exits.
    pub fn is_running(&self, name: &str) -> Option<u32> {
        match self.registry.lock().get(name) {
            Some(Slot::Running(handle)) => Some(handle.pid()),
            _ => None,
        }
    }

    /// Every running tunnel as `(name, pid)`, sorted by name.
    pub fn running(&self) -> Vec<(String, u32)> {
        let mut running: Vec<(String, u32)> = self
            .registry
            .lock()
            .iter()
            .filter_map(|(name, slot)| match slot {
                Slot::Running(handle) => Some((name.clone(), handle.pid())),
                Slot::Starting(_) => None,
            })
            .collect();
        running.sort();
        running
    }

    pub fn logs(&self, name: &str) -> Vec<String> {
        self.logs.snapshot(name)
    }

    fn reserve(&self, name: &str) -> Result<Reservation, SupervisorError> {
        let mut registry = self.registry.lock();
        if registry.contains_key(name) {
            return Err(SupervisorError::AlreadyRunning(name.to_string()));
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        registry.insert(name.to_string(), Slot::Starting(token));

        Ok(Reservation {
            registry: Arc::clone(&self.registry),
            name: name.to_string(),
            token,
            settled: false,
        })
    }

    fn log_sink(&self, name: &str) -> LogSink {
        let logs = Arc::clone(&self.logs);
        let name = name.to_string();
        Arc::new(move |line: String| logs.append(&name, &line))
    }

    /// Waits for the process to exit on its own and drops its entry, unless
    /// the entry already belongs to a newer tunnel.
    fn spawn_reaper(&self, name: String, handle: SshProcessHandle) {
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            handle.wait().await;

            let mut registry = registry.lock();
            let current = matches!(
                registry.get(&name),
                Some(Slot::Running(registered)) if registered.same_process(&handle)
            );
            if current {
                registry.remove(&name);
                info!("Tunnel '{}' (pid {}) exited", name, handle.pid());
            } else {
                debug!("Tunnel '{}' (pid {}) exited after being replaced or stopped", name, handle.pid());
            }
        });
    }
}

/// A `Starting` slot owned by one in-flight `start`. Released on drop unless
/// committed.
struct Reservation {
    registry: Registry,
    name: String,
    token: u64,
    settled: bool,
}

impl Reservation {
    /// Installs the running handle. An empty slot (cleared by `stop_all`) is
    /// taken over; a slot held by another start is not.
    fn commit(mut self, handle: SshProcessHandle) -> Result<(), SupervisorError> {
        self.settled = true;

        let mut registry = self.registry.lock();
        let ours = match registry.get(&self.name) {
            Some(Slot::Starting(token)) => *token == self.token,
            Some(Slot::Running(_)) => false,
            None => true,
        };
        if !ours {
            return Err(SupervisorError::AlreadyRunning(self.name.clone()));
        }

        registry.insert(self.name.clone(), Slot::Running(handle));
        Ok(())
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let mut registry = self.registry.lock();
        if matches!(registry.get(&self.name), Some(Slot::Starting(token)) if *token == self.token) {
            registry.remove(&self.name);
        }
    }
}
