//! # Core Logic - Per-slot Request Pacing
//!
//! Enforces a minimum spacing between outbound calls made by the same worker
//! slot. Slots are stable ids handed out by the dispatcher, so pacing does not
//! depend on which runtime thread happens to poll the worker.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot_time: Mutex<HashMap<usize, Instant>>,
}

impl RateLimiter {
    pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(2);

    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot_time: Mutex::new(HashMap::new()),
        }
    }

    /// Reserves the next turn for `slot` and waits for it.
    ///
    /// The reservation is made under the lock; the sleep happens after the lock
    /// is released. Returns `false` if `cancel` fired while waiting.
    pub async fn wait_turn(&self, slot: usize, cancel: &CancellationToken) -> bool {
        let now = Instant::now();
        let turn = {
            let mut map = self.next_slot_time.lock().unwrap_or_else(|p| p.into_inner());
            let turn = match map.get(&slot) {
                Some(prev) if *prev + self.min_interval > now => *prev + self.min_interval,
                _ => now,
            };
            map.insert(slot, turn);
            turn
        };

        if turn > now {
            debug!("Slot {} paced for {:?}", slot, turn - now);
            tokio::select! {
                _ = tokio::time::sleep_until(turn) => true,
                _ = cancel.cancelled() => false,
            }
        } else {
            !cancel.is_cancelled()
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn tracked_slots(&self) -> usize {
        self.next_slot_time
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MIN_INTERVAL)
    }
}
