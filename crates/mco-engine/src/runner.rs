//! Supervised execution of one provider child process.
//!
//! The runner owns spawn, concurrent stream capture, and cancellation for a
//! single provider. Cancellation is cooperative at the OS level: SIGTERM to
//! the child's process group, a grace period, then SIGKILL.

use crate::buffer::{OutputBuffer, DEFAULT_STREAM_CAP};
use crate::watchdog;
use mco_adapters::Invocation;
use mco_core::model::RunState;
use mco_core::time::{now_ms, EpochMs};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Environment variables that confuse agent CLIs when inherited from a
/// surrounding agent session.
const STRIPPED_ENV_VARS: &[&str] = &["CLAUDECODE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Stall,
    HardDeadline,
    External,
}

/// Supervision knobs for one runner.
#[derive(Debug, Clone)]
pub struct SuperviseParams {
    pub stall_window: Duration,
    /// Review mode only; measured from spawn.
    pub hard_deadline: Option<Duration>,
    pub grace: Duration,
    pub stream_cap: usize,
}

impl Default for SuperviseParams {
    fn default() -> Self {
        Self {
            stall_window: Duration::from_secs(900),
            hard_deadline: None,
            grace: Duration::from_secs(10),
            stream_cap: DEFAULT_STREAM_CAP,
        }
    }
}

/// Terminal record of one supervised execution.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: RunState,
    pub exit_code: Option<i32>,
    pub stdout_text: String,
    pub stderr_text: String,
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
    pub started_at_ms: EpochMs,
    pub ended_at_ms: EpochMs,
    pub cancel_reason: Option<CancelReason>,
    pub error_detail: Option<String>,
}

/// Idempotent cancellation handle shared by the watchdog and the external
/// interrupt path. The first caller wins; later reasons are ignored.
#[derive(Clone)]
pub struct Canceller {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    pid: Option<i32>,
    grace: Duration,
    reason: Mutex<Option<CancelReason>>,
    state: Arc<watch::Sender<RunState>>,
}

impl Canceller {
    fn new(pid: Option<u32>, grace: Duration, state: Arc<watch::Sender<RunState>>) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                pid: pid.map(|p| p as i32),
                grace,
                reason: Mutex::new(None),
                state,
            }),
        }
    }

    pub fn cancel(&self, reason: CancelReason) {
        {
            let mut guard = self.inner.reason.lock().unwrap_or_else(|e| e.into_inner());
            if guard.is_some() {
                return;
            }
            *guard = Some(reason);
        }
        self.inner.state.send_replace(RunState::Cancelling);
        if let Some(pid) = self.inner.pid {
            debug!("cancelling pid {pid} ({reason:?})");
            terminate_group(pid);
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(inner.grace).await;
                kill_group(pid);
            });
        }
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *self.inner.reason.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(unix)]
fn terminate_group(pid: i32) {
    // The child is its own process group leader, so the group id is its pid.
    unsafe {
        libc::killpg(pid, libc::SIGTERM);
    }
}

#[cfg(unix)]
fn kill_group(pid: i32) {
    unsafe {
        libc::killpg(pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn terminate_group(_pid: i32) {}

#[cfg(not(unix))]
fn kill_group(_pid: i32) {}

/// Run one provider invocation to a terminal state.
///
/// The state channel observes the lifecycle (spawning → running → stalling /
/// cancelling → terminal); `interrupt` flipping to true converges on
/// `cancel(External)`.
pub async fn run_supervised(
    invocation: &Invocation,
    repo_path: &Path,
    params: &SuperviseParams,
    state: Arc<watch::Sender<RunState>>,
    mut interrupt: watch::Receiver<bool>,
) -> RunOutcome {
    let started_at_ms = now_ms();

    if *interrupt.borrow() {
        state.send_replace(RunState::CancelledExternal);
        return failed_outcome(
            RunState::CancelledExternal,
            started_at_ms,
            Some(CancelReason::External),
            None,
        );
    }

    let Some((program, args)) = invocation.argv.split_first() else {
        state.send_replace(RunState::SpawnFailed);
        return failed_outcome(
            RunState::SpawnFailed,
            started_at_ms,
            None,
            Some("empty argv".to_string()),
        );
    };

    state.send_replace(RunState::Spawning);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(repo_path)
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for var in STRIPPED_ENV_VARS {
        cmd.env_remove(var);
    }
    cmd.envs(&invocation.env);

    // Own process group so cancellation can reach the whole subtree.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setpgid(0, 0);
            Ok(())
        });
    }

    let spawn_instant = tokio::time::Instant::now();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("spawn of '{program}' failed: {e}");
            state.send_replace(RunState::SpawnFailed);
            return failed_outcome(
                RunState::SpawnFailed,
                started_at_ms,
                None,
                Some(format!("spawn failed: {e}")),
            );
        }
    };
    state.send_replace(RunState::Running);

    if let Some(payload) = invocation.stdin.clone() {
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                let _ = stdin.write_all(payload.as_bytes()).await;
                // Dropping stdin closes it; agents expect EOF.
            });
        }
    }

    let stdout_buf = Arc::new(OutputBuffer::new(params.stream_cap));
    let stderr_buf = Arc::new(OutputBuffer::new(params.stream_cap));
    let stdout_task = child
        .stdout
        .take()
        .map(|out| tokio::spawn(drain(out, Arc::clone(&stdout_buf))));
    let stderr_task = child
        .stderr
        .take()
        .map(|err| tokio::spawn(drain(err, Arc::clone(&stderr_buf))));

    let canceller = Canceller::new(child.id(), params.grace, Arc::clone(&state));

    let (done_tx, done_rx) = watch::channel(false);
    let watchdog_task = tokio::spawn(watchdog::supervise(watchdog::WatchdogParams {
        stdout: Arc::clone(&stdout_buf),
        stderr: Arc::clone(&stderr_buf),
        stall_window: params.stall_window,
        hard_deadline: params.hard_deadline,
        spawned_at: spawn_instant,
        canceller: canceller.clone(),
        state: Arc::clone(&state),
        done: done_rx,
    }));

    let interrupt_task = tokio::spawn({
        let canceller = canceller.clone();
        async move {
            loop {
                if *interrupt.borrow() {
                    canceller.cancel(CancelReason::External);
                    return;
                }
                if interrupt.changed().await.is_err() {
                    return;
                }
            }
        }
    });

    let status = child.wait().await;
    let _ = done_tx.send(true);
    // A grandchild that inherited the pipes can keep them open past the
    // child's exit; don't let that hold finalization beyond the grace window.
    for task in [stdout_task, stderr_task].into_iter().flatten() {
        if tokio::time::timeout(params.grace, task).await.is_err() {
            warn!("stream reader still open after exit, abandoning it");
        }
    }
    let _ = watchdog_task.await;
    interrupt_task.abort();

    let ended_at_ms = now_ms();
    let cancel_reason = canceller.reason();
    let (final_state, exit_code, error_detail) = match status {
        Ok(st) => {
            let terminal = match cancel_reason {
                Some(CancelReason::Stall) => RunState::CancelledStall,
                Some(CancelReason::HardDeadline) => RunState::CancelledHard,
                Some(CancelReason::External) => RunState::CancelledExternal,
                None if st.success() => RunState::ExitedOk,
                None => RunState::ExitedErr,
            };
            (terminal, st.code(), None)
        }
        Err(e) => (
            RunState::ExitedErr,
            None,
            Some(format!("wait failed: {e}")),
        ),
    };
    state.send_replace(final_state);

    RunOutcome {
        state: final_state,
        exit_code,
        stdout_text: stdout_buf.text(),
        stderr_text: stderr_buf.text(),
        stdout_bytes: stdout_buf.total(),
        stderr_bytes: stderr_buf.total(),
        started_at_ms,
        ended_at_ms,
        cancel_reason,
        error_detail,
    }
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R, buf: Arc<OutputBuffer>) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buf.push(&chunk[..n]),
            Err(_) => break,
        }
    }
}

fn failed_outcome(
    state: RunState,
    started_at_ms: EpochMs,
    cancel_reason: Option<CancelReason>,
    error_detail: Option<String>,
) -> RunOutcome {
    RunOutcome {
        state,
        exit_code: None,
        stdout_text: String::new(),
        stderr_text: String::new(),
        stdout_bytes: 0,
        stderr_bytes: 0,
        started_at_ms,
        ended_at_ms: now_ms(),
        cancel_reason,
        error_detail,
    }
}
