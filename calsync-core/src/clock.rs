//! Wall-clock source for schedule computations.

/// Supplies the current Unix time in seconds.
///
/// Schedule state (`next_run_at`) is expressed in wall-clock seconds, while
/// sleeps go through `tokio::time`; keeping "now" behind a trait lets tests
/// move the schedule clock without waiting.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}
