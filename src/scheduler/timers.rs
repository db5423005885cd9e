//! Timer registry owned by the scheduler.
//!
//! Wraps [`DelayQueue`] so every pending reveal timer lives in one place and
//! an interrupt or reset can drop all of them with [`TimerRegistry::cancel_all`].

use std::future::poll_fn;
use std::time::Duration;

use tokio_util::time::DelayQueue;

pub struct TimerRegistry<T> {
    queue: DelayQueue<T>,
}

impl<T> Default for TimerRegistry<T> {
    fn default() -> Self {
        Self {
            queue: DelayQueue::new(),
        }
    }
}

impl<T> TimerRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `value` after `delay`.
    pub fn schedule(&mut self, value: T, delay: Duration) {
        self.queue.insert(value, delay);
    }

    pub fn cancel_all(&mut self) {
        self.queue.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Wait for the next timer to fire.
    ///
    /// Resolves to `None` when the registry is empty, so callers in a
    /// `select!` should guard on [`is_empty`](Self::is_empty).
    pub async fn next_expired(&mut self) -> Option<T> {
        poll_fn(|cx| self.queue.poll_expired(cx))
            .await
            .map(|expired| expired.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
