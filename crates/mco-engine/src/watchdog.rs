//! Progress-driven stall detection and the review-mode hard deadline.
//!
//! The watchdog never touches the child directly; it observes the byte
//! counters and converges on `Canceller::cancel`, which handles signalling.

use crate::buffer::OutputBuffer;
use crate::runner::{CancelReason, Canceller};
use mco_core::model::RunState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

pub struct WatchdogParams {
    pub stdout: Arc<OutputBuffer>,
    pub stderr: Arc<OutputBuffer>,
    pub stall_window: Duration,
    pub hard_deadline: Option<Duration>,
    pub spawned_at: Instant,
    pub canceller: Canceller,
    pub state: Arc<watch::Sender<RunState>>,
    pub done: watch::Receiver<bool>,
}

/// Sampling interval: frequent enough to notice a stall promptly, never
/// busier than 5 s.
pub fn sample_interval(stall_window: Duration) -> Duration {
    Duration::from_secs(5).min(stall_window / 30).max(Duration::from_millis(25))
}

/// Watch one runner until it terminates or a deadline fires.
///
/// Stall detection is two-phase: the first tick past the window marks the
/// runner as stalling, the next tick cancels unless bytes arrived in between.
/// A hard-deadline hit on the same tick as a stall classifies as hard.
pub async fn supervise(params: WatchdogParams) {
    let WatchdogParams {
        stdout,
        stderr,
        stall_window,
        hard_deadline,
        spawned_at,
        canceller,
        state,
        mut done,
    } = params;

    let interval = sample_interval(stall_window);
    let mut last_total = 0u64;
    let mut last_progress = Instant::now();
    let mut stalling = false;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = done.changed() => {
                if changed.is_err() || *done.borrow() {
                    return;
                }
                continue;
            }
        }

        if let Some(hard) = hard_deadline {
            if spawned_at.elapsed() >= hard {
                warn!("hard deadline reached after {:?}", spawned_at.elapsed());
                canceller.cancel(CancelReason::HardDeadline);
                return;
            }
        }

        let total = stdout.total() + stderr.total();
        if total > last_total {
            last_total = total;
            last_progress = Instant::now();
            if stalling {
                stalling = false;
                // Recovered before the cancel was issued.
                if *state.borrow() == RunState::Stalling {
                    state.send_replace(RunState::Running);
                }
            }
            continue;
        }

        if last_progress.elapsed() >= stall_window {
            if stalling {
                warn!(
                    "no output for {:?} (window {:?}), cancelling",
                    last_progress.elapsed(),
                    stall_window
                );
                canceller.cancel(CancelReason::Stall);
                return;
            }
            stalling = true;
            debug!("no output for {:?}, marking stalled", last_progress.elapsed());
            if *state.borrow() == RunState::Running {
                state.send_replace(RunState::Stalling);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_tracks_window() {
        assert_eq!(sample_interval(Duration::from_secs(900)), Duration::from_secs(5));
        assert_eq!(sample_interval(Duration::from_secs(30)), Duration::from_secs(1));
        assert_eq!(sample_interval(Duration::from_secs(3)), Duration::from_millis(100));
        // Tiny windows clamp so the loop cannot spin.
        assert_eq!(sample_interval(Duration::from_millis(60)), Duration::from_millis(25));
    }
}
