use std::process::Stdio;
use std::time::Duration;
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use ports_config::{Config, Profile};

use crate::args::build_ssh_args;
use crate::readiness::{self, READINESS_TIMEOUT};
use crate::{LogSink, SshError, SshProcessHandle, SshService};

pub struct SshServiceImpl {
    program: String,
    readiness_timeout: Duration,
}

impl SshServiceImpl {
    pub fn new(config: &Config) -> Self {
        Self::with_program(config.ssh_program.as_deref().unwrap_or("ssh"))
    }

    /// Runs `program` in place of `ssh`, with the same arguments.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            readiness_timeout: READINESS_TIMEOUT,
        }
    }

    pub fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }
}

#[async_trait]
impl SshService for SshServiceImpl {
    async fn start_tunnel(
        &self,
        profile: &Profile,
        on_log: LogSink,
    ) -> Result<SshProcessHandle, SshError> {
        let args = build_ssh_args(profile);

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        info!("Spawning SSH command for '{}': {} {}", profile.name, self.program, args.join(" "));

        let mut child = cmd.spawn()?;
        let pid = child.id().ok_or_else(|| {
            SshError::Spawn(std::io::Error::other("SSH process exited before its pid was read"))
        })?;

        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, "OUT", on_log.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, "ERR", on_log);
        }

        let (handle, notifier) = SshProcessHandle::new(pid);
        let name = profile.name.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("SSH process for '{}' (pid {}) exited: {}", name, pid, status),
                Err(e) => warn!("Failed to wait on SSH process for '{}' (pid {}): {}", name, pid, e),
            }
            notifier.notify_exit();
        });

        // Until start_tunnel returns, a dropped future must not leave the
        // client running unowned.
        let guard = SpawnGuard {
            handle: Some(handle.clone()),
        };
        let probe = handle.clone();
        let ready =
            readiness::wait_until_ready(&profile.forwards, || probe.is_alive(), self.readiness_timeout)
                .await;
        guard.disarm();

        if let Err(e) = ready {
            debug!("Tunnel '{}' (pid {}) failed to start: {}", profile.name, pid, e);
            return Err(e);
        }

        info!("Tunnel '{}' is ready (pid {})", profile.name, pid);
        Ok(handle)
    }

    fn stop_tunnel(&self, handle: &SshProcessHandle) -> Result<(), SshError> {
        if handle.has_exited() {
            return Ok(());
        }

        info!("Terminating SSH process group {}", handle.pgid());
        let pgid = Pid::from_raw(handle.pgid() as i32);
        if signal::killpg(pgid, Signal::SIGTERM).is_ok() {
            return Ok(());
        }

        match signal::kill(Pid::from_raw(handle.pid() as i32), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(SshError::Signal {
                pid: handle.pid(),
                source,
            }),
        }
    }
}

/// Sends SIGTERM to the client's group if dropped while still armed.
struct SpawnGuard {
    handle: Option<SshProcessHandle>,
}

impl SpawnGuard {
    fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for SpawnGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.has_exited() {
            return;
        }

        debug!("Start abandoned; terminating SSH process group {}", handle.pgid());
        if let Err(e) = signal::killpg(Pid::from_raw(handle.pgid() as i32), Signal::SIGTERM) {
            warn!("Failed to terminate abandoned SSH process {}: {}", handle.pid(), e);
        }
    }
}

fn spawn_line_reader<R>(stream: R, tag: &'static str, on_log: LogSink)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(forward_lines(stream, tag, on_log));
}

/// Forwards each non-blank line of `stream` to `on_log` until the pipe closes.
/// Bytes that are not valid UTF-8 are replaced, never fatal.
async fn forward_lines<R>(stream: R, tag: &'static str, on_log: LogSink)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                if line.trim().is_empty() {
                    continue;
                }
                on_log(format!("{}: {}", tag, line));
            }
            Err(e) => {
                debug!("Stopped reading SSH {} stream: {}", tag, e);
                break;
            }
        }
    }
}
