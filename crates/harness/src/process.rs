//! Lifecycle of one spawned submission.
//!
//! The submission runs in its own process group so teardown reaches every
//! helper process it forked, not just the direct child.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::{HarnessConfig, ReadinessMode};
use crate::error::ProcessError;

/// Bytes of submission stderr kept for diagnostics (the most recent ones).
const STDERR_CAPTURE_LIMIT: usize = 8 * 1024;
const STDERR_COLLECT_TIMEOUT_MS: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    Terminated,
}

/// How `start` waits before declaring the server ready.
#[derive(Debug, Clone)]
pub enum Readiness {
    Delay(Duration),
    Poll {
        addr: String,
        interval: Duration,
        limit: Duration,
    },
}

impl Readiness {
    pub fn from_config(config: &HarnessConfig) -> Self {
        match config.timing.readiness {
            ReadinessMode::Delay => Self::Delay(config.timing.readiness_delay()),
            ReadinessMode::Poll => Self::Poll {
                addr: config.addr(),
                interval: config.timing.poll_interval(),
                limit: config.timing.readiness_delay(),
            },
        }
    }
}

pub struct ManagedProcess {
    command: Vec<String>,
    child: Option<Child>,
    pid: Option<u32>,
    state: ProcessState,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

impl ManagedProcess {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            child: None,
            pid: None,
            state: ProcessState::NotStarted,
            stderr: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Launch the submission in a fresh process group and wait for readiness.
    ///
    /// Readiness is an approximation: with [`Readiness::Delay`] the server is
    /// merely assumed to be listening once the delay has elapsed.
    pub async fn start(&mut self, readiness: &Readiness) -> Result<u32, ProcessError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or(ProcessError::EmptyCommand)?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

        let pid = child.id().unwrap_or_default();
        info!(pid, program = %program, "Submission started");

        self.stderr = child.stderr.take().map(|pipe| tokio::spawn(drain_stderr(pipe)));
        self.pid = Some(pid);
        self.child = Some(child);
        self.state = ProcessState::Running;

        self.await_readiness(readiness).await;

        if let Some(status) = self.exit_status() {
            self.state = ProcessState::Terminated;
            self.child = None;
            // Helpers the server forked may still hold the group.
            signal_group(pid, GroupSignal::Kill);
            let stderr = self.collect_stderr().await;
            warn!(pid, %status, "Submission exited during startup");
            return Err(ProcessError::ExitedEarly {
                status: status.to_string(),
                stderr,
            });
        }

        Ok(pid)
    }

    async fn await_readiness(&mut self, readiness: &Readiness) {
        match readiness {
            Readiness::Delay(delay) => sleep(*delay).await,
            Readiness::Poll {
                addr,
                interval,
                limit,
            } => {
                let deadline = Instant::now() + *limit;
                while Instant::now() < deadline {
                    if self.exit_status().is_some() {
                        return;
                    }
                    if let Ok(Ok(_probe)) = timeout(*interval, TcpStream::connect(addr)).await {
                        debug!(addr = %addr, "Submission accepting connections");
                        return;
                    }
                    sleep(*interval).await;
                }
                debug!(addr = %addr, "Readiness poll expired, proceeding anyway");
            }
        }
    }

    fn exit_status(&mut self) -> Option<std::process::ExitStatus> {
        self.child.as_mut().and_then(|c| c.try_wait().ok().flatten())
    }

    /// Whether the direct child is still running.
    pub fn is_running(&mut self) -> bool {
        self.child.is_some() && self.exit_status().is_none()
    }

    /// Terminate the whole process group and reap the child.
    ///
    /// Never fails: `SIGTERM` first, `SIGKILL` if the child outlives
    /// `grace`, and every problem along the way is only logged.
    pub async fn stop(&mut self, grace: Duration) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = self.pid.unwrap_or_default();

        signal_group(pid, GroupSignal::Terminate);
        match timeout(grace, child.wait()).await {
            Ok(Ok(status)) => debug!(pid, %status, "Submission stopped"),
            Ok(Err(e)) => warn!(pid, error = %e, "Failed to reap submission"),
            Err(_) => {
                warn!(
                    pid,
                    grace_ms = grace.as_millis() as u64,
                    "Submission ignored SIGTERM, killing process group"
                );
                signal_group(pid, GroupSignal::Kill);
                if let Err(e) = child.start_kill() {
                    debug!(pid, error = %e, "Direct kill failed");
                }
                match timeout(grace, child.wait()).await {
                    Ok(Ok(status)) => debug!(pid, %status, "Submission killed"),
                    Ok(Err(e)) => warn!(pid, error = %e, "Failed to reap submission"),
                    Err(_) => warn!(pid, "Submission did not exit after SIGKILL"),
                }
            }
        }

        // Sweep descendants that survived their leader.
        signal_group(pid, GroupSignal::Kill);
        self.state = ProcessState::Terminated;

        let stderr = self.collect_stderr().await;
        if !stderr.is_empty() {
            debug!(pid, stderr = %stderr, "Submission stderr");
        }
    }

    async fn collect_stderr(&mut self) -> String {
        let Some(task) = self.stderr.take() else {
            return String::new();
        };
        match timeout(Duration::from_millis(STDERR_COLLECT_TIMEOUT_MS), task).await {
            Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).trim_end().to_string(),
            Ok(Err(e)) => {
                debug!(error = %e, "stderr reader failed");
                String::new()
            }
            Err(_) => String::new(),
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if self.child.is_some() {
            if let Some(pid) = self.pid {
                debug!(pid, "Killing submission process group on drop");
                signal_group(pid, GroupSignal::Kill);
            }
        }
        if let Some(task) = self.stderr.take() {
            task.abort();
        }
    }
}

async fn drain_stderr(mut pipe: tokio::process::ChildStderr) -> Vec<u8> {
    let mut captured = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                captured.extend_from_slice(&buf[..n]);
                if captured.len() > STDERR_CAPTURE_LIMIT {
                    let excess = captured.len() - STDERR_CAPTURE_LIMIT;
                    captured.drain(..excess);
                }
            }
        }
    }
    captured
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: GroupSignal) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if pgid == 0 {
        return;
    }
    let signal = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    #[allow(clippy::cast_possible_wrap)]
    let group = Pid::from_raw(pgid as i32);
    match killpg(group, signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid, ?signal, error = %e, "Failed to signal process group"),
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: u32, _signal: GroupSignal) {}

/// Whether `pid` names a live (non-zombie) process.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    #[allow(clippy::cast_possible_wrap)]
    let target = Pid::from_raw(pid as i32);
    if kill(target, None).is_err() {
        return false;
    }
    // Zombies still answer signal 0.
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .map(|state| state != "Z" && state != "X")
            .unwrap_or(true),
        Err(_) => true,
    }
}
