//! Time budgets and the one-second countdown task.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::exam::ExamMode;

/// Resolution of the countdown.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Computes the starting countdown for an attempt, in seconds.
///
/// Returns `None` unless the mode is timed. The extended-time factor is
/// applied once, here, before the countdown starts.
///
/// # Examples
///
/// ```
/// use nova_session::timer::time_budget_seconds;
/// use nova_session::ExamMode;
///
/// assert_eq!(time_budget_seconds(1800, ExamMode::Timed, true, 1.5), Some(2700));
/// assert_eq!(time_budget_seconds(1800, ExamMode::Timed, false, 1.5), Some(1800));
/// assert_eq!(time_budget_seconds(1800, ExamMode::Practice, true, 1.5), None);
/// ```
#[must_use]
pub fn time_budget_seconds(
    base_seconds: u64,
    mode: ExamMode,
    extended_time: bool,
    extended_factor: f64,
) -> Option<u64> {
    match mode {
        ExamMode::Timed if extended_time => Some(scale(base_seconds, extended_factor)),
        ExamMode::Timed => Some(base_seconds),
        ExamMode::Untimed | ExamMode::Practice => None,
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn scale(seconds: u64, factor: f64) -> u64 {
    let scaled = (seconds as f64 * factor.max(1.0)).round();
    if scaled >= u64::MAX as f64 {
        u64::MAX
    } else {
        scaled as u64
    }
}

/// A repeating tick task that stops when cancelled or dropped.
#[derive(Debug)]
pub struct Countdown {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Countdown {
    /// Spawns a task that calls `on_tick` once per `period`, starting one
    /// period from now, until `on_tick` breaks or the countdown is
    /// cancelled.
    pub fn start<F, Fut>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send,
    {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    () = child.cancelled() => {
                        debug!("Countdown cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        if on_tick().await.is_break() {
                            debug!("Countdown finished");
                            break;
                        }
                    }
                }
            }
        });

        Self { token, handle }
    }

    /// Stops the countdown. No tick runs after this returns, except one
    /// already in progress.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
