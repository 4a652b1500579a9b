use std::{future::Future, time::Duration};

use tokio::task::JoinHandle;

/// Owns at most one scheduled task.
///
/// Arming replaces the previous task (it is aborted first), and dropping the
/// slot aborts whatever is still scheduled, so a slot never leaks a timer past
/// its owner.
#[derive(Debug, Default)]
pub struct TimerSlot {
    task: Option<JoinHandle<()>>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.task = Some(tokio::spawn(task));
    }

    /// Runs `fire` once after `delay` unless the slot is re-armed or cancelled first.
    pub fn arm_after<F>(&mut self, delay: Duration, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.arm(async move {
            tokio::time::sleep(delay).await;
            fire();
        });
    }

    /// Returns true if a task was still scheduled.
    pub fn cancel(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                let was_running = !task.is_finished();
                task.abort();
                was_running
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rearming_cancels_the_previous_timer() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut slot = TimerSlot::new();

        let first = Arc::clone(&fired);
        slot.arm_after(Duration::from_millis(100), move || {
            first.fetch_add(1, Ordering::SeqCst);
        });
        let second = Arc::clone(&fired);
        slot.arm_after(Duration::from_millis(300), move || {
            second.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(slot.is_armed());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
        assert!(!slot.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_drop_stop_pending_timers() {
        let fired = Arc::new(AtomicUsize::new(0));

        let mut slot = TimerSlot::new();
        let counter = Arc::clone(&fired);
        slot.arm_after(Duration::from_millis(50), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(slot.cancel());
        assert!(!slot.cancel());

        let mut dropped = TimerSlot::new();
        let counter = Arc::clone(&fired);
        dropped.arm_after(Duration::from_millis(50), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(dropped);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
