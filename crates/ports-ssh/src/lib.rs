//! Launching and terminating the external `ssh` client that carries a
//! profile's local port forwards.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use nix::errno::Errno;
use thiserror::Error;

use ports_config::Profile;

pub mod args;
mod handle;
pub mod readiness;
mod service;

pub use args::{build_ssh_args, forward_spec};
pub use handle::{ExitNotifier, SshProcessHandle};
pub use service::SshServiceImpl;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("Failed to spawn SSH process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("ssh exited during startup")]
    ExitedDuringStartup,
    #[error("ssh did not become ready within {timeout:?}")]
    NotReady { timeout: Duration },
    #[error("Failed to signal SSH process {pid}: {source}")]
    Signal { pid: u32, source: Errno },
}

/// Receives every captured output line, already tagged `OUT: ` or `ERR: `.
pub type LogSink = Arc<dyn Fn(String) + Send + Sync>;

/// The `SshService` trait defines the contract for running one tunnel process
/// per profile.
#[async_trait]
pub trait SshService: Send + Sync {
    /// Spawns the client and resolves once every forward accepts connections.
    /// A process that is still starting when the readiness deadline passes is
    /// left running. Dropping the future before it resolves terminates the
    /// client.
    async fn start_tunnel(
        &self,
        profile: &Profile,
        on_log: LogSink,
    ) -> Result<SshProcessHandle, SshError>;

    /// Sends SIGTERM to the tunnel's process group. Idempotent.
    fn stop_tunnel(&self, handle: &SshProcessHandle) -> Result<(), SshError>;
}
