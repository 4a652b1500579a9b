use std::{future::Future, time::Duration};

use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::timer::TimerSlot;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Shortest interval the poller accepts; smaller values are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Periodic fetch loop with one fetch in flight at a time.
///
/// The first fetch runs immediately. Ticks that elapse while a fetch is still
/// running are skipped rather than queued, so a slow agent never builds up a
/// backlog of requests.
#[derive(Debug, Default)]
pub struct StatusPoller {
    slot: TimerSlot,
}

impl StatusPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts polling, replacing any loop that is already running.
    pub fn start<T, E, F, Fut, R, X>(
        &mut self,
        interval: Duration,
        mut fetch: F,
        mut on_result: R,
        mut on_error: X,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        R: FnMut(T) + Send + 'static,
        X: FnMut(E) + Send + 'static,
        T: 'static,
        E: 'static,
    {
        self.stop();
        let period = interval.max(MIN_POLL_INTERVAL);
        debug!(interval_ms = period.as_millis() as u64, "status poller starting");

        self.slot.arm(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match fetch().await {
                    Ok(value) => on_result(value),
                    Err(err) => on_error(err),
                }
            }
        });
    }

    /// Stops the loop. Safe to call when nothing is running.
    pub fn stop(&mut self) {
        if self.slot.cancel() {
            debug!("status poller stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot.is_armed()
    }
}
