//! Background refresh timer.
//!
//! The poller only says "refresh now": the UI task owns the loaders and runs the
//! refresh itself through the task runner. The interval is controlled externally via
//! a `watch::Receiver<u64>`; the UI writes a backed-off interval after failed
//! refreshes (`base × 2^failures`, capped at `MAX_BACKOFF_SECS`) and the base
//! interval again after the next success.

use crate::events::{AppEvent, UiSender};
use tokio::sync::watch;
use tokio::time;

/// 5 minutes: the longest a user should wait between automatic retries.
pub const MAX_BACKOFF_SECS: u64 = 300;

/// Compute backoff delay: `min(base_interval * 2^failures, MAX_BACKOFF_SECS)`.
pub fn backoff_delay(base_interval: u64, failures: u32) -> u64 {
    let multiplier = 1u64.checked_shl(failures).unwrap_or(u64::MAX);
    base_interval
        .saturating_mul(multiplier)
        .clamp(1, MAX_BACKOFF_SECS)
}

pub struct Poller {
    tx: UiSender,
    interval_rx: watch::Receiver<u64>,
}

impl Poller {
    pub fn new(tx: UiSender, interval_rx: watch::Receiver<u64>) -> Self {
        Self { tx, interval_rx }
    }

    /// Send [`AppEvent::PollTick`] every interval until the UI goes away. An interval
    /// change restarts the wait with the new value.
    pub async fn run(mut self) {
        loop {
            let delay = (*self.interval_rx.borrow_and_update()).max(1);
            tokio::select! {
                () = time::sleep(time::Duration::from_secs(delay)) => {
                    if self.tx.send(AppEvent::PollTick).is_err() {
                        return;
                    }
                }
                changed = self.interval_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    tracing::debug!(interval = *self.interval_rx.borrow(), "poll interval changed");
                }
            }
        }
    }
}
