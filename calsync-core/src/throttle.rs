//! Minimum spacing between outbound write calls.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, sleep_until};

/// A pacing gate shared by all workers of one sync run.
///
/// Each acquisition reserves the next free slot and sleeps until it, so the
/// aggregate call rate is bounded no matter how many workers are active.
#[derive(Debug)]
pub struct Throttle {
    gap: Duration,
    next_at: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(gap: Duration) -> Self {
        Throttle {
            gap,
            next_at: Mutex::new(None),
        }
    }

    /// Wait for this caller's slot.
    pub async fn acquire(&self) {
        let slot = {
            let mut next_at = self.next_at.lock();
            let now = Instant::now();
            let slot = next_at.map_or(now, |at| at.max(now));
            *next_at = Some(slot + self.gap);
            slot
        };

        sleep_until(slot).await;
    }
}
