use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use crate::timer::TimerSlot;

pub const DEFAULT_FEEDBACK_DURATION: Duration = Duration::from_millis(2000);

#[derive(Debug)]
struct Label {
    text: String,
    generation: u64,
}

/// Short-lived labels (e.g. "copied!") that fall back to a default after a delay.
///
/// Each key owns its own timer. A newer `show` for the same key cancels the
/// older revert, and the revert also checks the generation it was armed for.
#[derive(Debug)]
pub struct TransientFeedback<K> {
    default_label: String,
    labels: Arc<Mutex<HashMap<K, Label>>>,
    timers: HashMap<K, TimerSlot>,
}

impl<K> TransientFeedback<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(default_label: impl Into<String>) -> Self {
        Self {
            default_label: default_label.into(),
            labels: Arc::new(Mutex::new(HashMap::new())),
            timers: HashMap::new(),
        }
    }

    pub fn show(&mut self, key: K, label: impl Into<String>, duration: Duration) {
        let generation = {
            let mut labels = self.labels.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = labels.entry(key.clone()).or_insert_with(|| Label {
                text: String::new(),
                generation: 0,
            });
            entry.generation += 1;
            entry.text = label.into();
            entry.generation
        };

        let labels = Arc::clone(&self.labels);
        let default_label = self.default_label.clone();
        let revert_key = key.clone();
        self.timers.entry(key).or_default().arm_after(duration, move || {
            let mut labels = labels.lock().unwrap_or_else(PoisonError::into_inner);
            match labels.get_mut(&revert_key) {
                Some(entry) if entry.generation == generation => entry.text = default_label,
                _ => {}
            }
        });
    }

    pub fn label(&self, key: &K) -> String {
        let labels = self.labels.lock().unwrap_or_else(PoisonError::into_inner);
        labels
            .get(key)
            .map(|entry| entry.text.clone())
            .unwrap_or_else(|| self.default_label.clone())
    }

    /// Cancels every pending revert and shows the default label everywhere.
    pub fn cancel_all(&mut self) {
        for slot in self.timers.values_mut() {
            slot.cancel();
        }
        self.timers.clear();
        self.labels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
