//! Admission backpressure: the `Retry-After` hint for saturated ingest.
//!
//! When the ingest queue rejects a batch, the advertised retry interval grows
//! logarithmically with saturation pressure, capped at
//! [`RESET_RETRY_AFTER_SECOND`]; after a quiet window of the same length it
//! snaps back to [`RETRY_AFTER_SECOND`].

use std::sync::atomic::{AtomicI64, Ordering};

use crate::config::unix_now;

/// Minimum advertised `Retry-After` (seconds).
pub const RETRY_AFTER_SECOND: i64 = 10;

/// Cap on the advertised `Retry-After`, and the quiet window that resets it.
pub const RESET_RETRY_AFTER_SECOND: i64 = 60;

/// Tracks saturation instants and the current `Retry-After` value.
#[derive(Debug)]
pub struct AdmissionControl {
    retry_after: AtomicI64,
    last_unavailable_at: AtomicI64,
}

impl AdmissionControl {
    pub fn new() -> AdmissionControl {
        AdmissionControl {
            retry_after: AtomicI64::new(RETRY_AFTER_SECOND),
            last_unavailable_at: AtomicI64::new(0),
        }
    }

    /// Record a saturation event and return the `Retry-After` to advertise.
    pub fn on_queue_full(&self) -> i64 {
        self.on_queue_full_at(unix_now())
    }

    /// As [`on_queue_full`](Self::on_queue_full) with an explicit clock.
    pub fn on_queue_full_at(&self, now: i64) -> i64 {
        let prev = self.last_unavailable_at.swap(now, Ordering::SeqCst);
        let gap = now - prev;
        let next = if gap > RESET_RETRY_AFTER_SECOND {
            RETRY_AFTER_SECOND
        } else {
            let a = (10.0 / (gap as f64 + 1.0) + 1.0).ln().floor() as i64;
            (self.retry_after.load(Ordering::SeqCst) + 2 * a).min(RESET_RETRY_AFTER_SECOND)
        };
        self.retry_after.store(next, Ordering::SeqCst);
        next
    }

    /// The currently advertised `Retry-After` (seconds).
    pub fn retry_after(&self) -> i64 {
        self.retry_after.load(Ordering::SeqCst)
    }

    /// Unix time of the most recent saturation event (0 if never).
    pub fn last_unavailable_at(&self) -> i64 {
        self.last_unavailable_at.load(Ordering::SeqCst)
    }
}

impl Default for AdmissionControl {
    fn default() -> Self {
        AdmissionControl::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_saturation_advertises_the_minimum() {
        let admission = AdmissionControl::new();
        assert_eq!(admission.on_queue_full_at(1_000_000), RETRY_AFTER_SECOND);
    }

    #[test]
    fn sustained_saturation_grows_monotonically_to_the_cap() {
        let admission = AdmissionControl::new();
        let mut prev = admission.on_queue_full_at(1_000_000);
        for _ in 0..30 {
            let next = admission.on_queue_full_at(1_000_000);
            assert!(next >= prev, "retry-after decreased: {next} < {prev}");
            assert!(next <= RESET_RETRY_AFTER_SECOND);
            prev = next;
        }
        assert_eq!(prev, RESET_RETRY_AFTER_SECOND);
    }

    #[test]
    fn growth_is_strict_under_rapid_saturation() {
        let admission = AdmissionControl::new();
        let first = admission.on_queue_full_at(1_000_000);
        let second = admission.on_queue_full_at(1_000_000);
        let third = admission.on_queue_full_at(1_000_000);
        assert!(second > first);
        assert!(third > second);
    }

    #[test]
    fn quiet_window_resets_to_the_minimum() {
        let admission = AdmissionControl::new();
        for _ in 0..10 {
            admission.on_queue_full_at(1_000_000);
        }
        assert!(admission.retry_after() > RETRY_AFTER_SECOND);
        let after_quiet = admission.on_queue_full_at(1_000_000 + RESET_RETRY_AFTER_SECOND + 1);
        assert_eq!(after_quiet, RETRY_AFTER_SECOND);
    }

    #[test]
    fn last_unavailable_at_tracks_the_latest_event() {
        let admission = AdmissionControl::new();
        admission.on_queue_full_at(42);
        assert_eq!(admission.last_unavailable_at(), 42);
    }
}
