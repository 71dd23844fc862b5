//! Cadence arithmetic for job run times.

/// Upper bound on how soon a failed job is retried.
pub const FAILURE_RETRY_SECS: i64 = 120;

/// Jobs overdue by more than this at startup are realigned instead of run
/// immediately.
pub const STALE_AFTER_SECS: i64 = 3600;

/// The smallest boundary strictly after `from` that is a whole multiple of
/// the cadence, counted from the Unix epoch.
///
/// With a 15 minute cadence, `:07` maps to `:15` and `:15` maps to `:30`.
pub fn next_aligned_run(interval_min: u32, from: i64) -> i64 {
    let step = i64::from(interval_min.max(1)) * 60;
    (from.div_euclid(step) + 1) * step
}

/// Next run time after a failed execution: a quick retry that never lands
/// past the regular boundary.
pub fn retry_after_failure(interval_min: u32, now: i64) -> i64 {
    next_aligned_run(interval_min, now).min(now + FAILURE_RETRY_SECS)
}
