//! Decides when a freshly spawned tunnel is usable: every forward's local
//! listener accepts a TCP connection. Says nothing about the remote leg.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tracing::trace;

use ports_config::Forward;

use crate::SshError;

pub const READINESS_TIMEOUT: Duration = Duration::from_secs(5);
pub const DIAL_TIMEOUT: Duration = Duration::from_millis(120);
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Polls until all forwards are connectable in a single pass, the process
/// dies, or `timeout` elapses. No forwards means ready.
pub async fn wait_until_ready<F>(
    forwards: &[Forward],
    is_alive: F,
    timeout: Duration,
) -> Result<(), SshError>
where
    F: Fn() -> bool,
{
    if forwards.is_empty() {
        return Ok(());
    }

    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !is_alive() {
            return Err(SshError::ExitedDuringStartup);
        }

        if forwards_listening(forwards).await {
            return Ok(());
        }

        time::sleep(POLL_INTERVAL).await;
    }

    Err(SshError::NotReady { timeout })
}

async fn forwards_listening(forwards: &[Forward]) -> bool {
    for forward in forwards {
        if !port_accepts(forward.probe_host(), forward.local_port).await {
            trace!("{}:{} not accepting yet", forward.probe_host(), forward.local_port);
            return false;
        }
    }
    true
}

async fn port_accepts(host: &str, port: u16) -> bool {
    matches!(
        time::timeout(DIAL_TIMEOUT, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}
