use std::sync::Arc;
use nix::sys::signal;
use nix::unistd::Pid;
use tokio::sync::watch;

#[derive(Debug)]
struct ProcessIdentity {
    pid: u32,
    exited: watch::Receiver<bool>,
}

/// A handle to a running SSH client subprocess.
///
/// Clones refer to the same process. The child itself is owned by a waiter
/// task, which reports its exit through the paired [`ExitNotifier`].
#[derive(Debug, Clone)]
pub struct SshProcessHandle {
    inner: Arc<ProcessIdentity>,
}

/// Write half of a handle's exit notification. Dropping it also counts as exit.
#[derive(Debug)]
pub struct ExitNotifier {
    tx: watch::Sender<bool>,
}

impl ExitNotifier {
    pub fn notify_exit(self) {
        self.tx.send_replace(true);
    }
}

impl SshProcessHandle {
    pub fn new(pid: u32) -> (Self, ExitNotifier) {
        let (tx, exited) = watch::channel(false);
        let handle = Self {
            inner: Arc::new(ProcessIdentity { pid, exited }),
        };
        (handle, ExitNotifier { tx })
    }

    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    /// The process is spawned as its own group leader.
    pub fn pgid(&self) -> u32 {
        self.inner.pid
    }

    pub fn has_exited(&self) -> bool {
        *self.inner.exited.borrow() || self.inner.exited.has_changed().is_err()
    }

    /// Exit not yet reported and the pid still answers the null signal.
    pub fn is_alive(&self) -> bool {
        !self.has_exited() && signal::kill(Pid::from_raw(self.pid() as i32), None).is_ok()
    }

    /// Resolves once the process has exited.
    pub async fn wait(&self) {
        let mut exited = self.inner.exited.clone();
        // An Err means the notifier is gone, which is treated as exit too.
        let _ = exited.wait_for(|done| *done).await;
    }

    /// True when both handles come from the same spawn, even if the OS has
    /// since reused the pid.
    pub fn same_process(&self, other: &SshProcessHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
