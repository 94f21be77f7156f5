//! Shared counters and the `/stats/app` snapshot.
//!
//! Counters are plain atomic adds with no happens-before relationship to the
//! events they describe; the snapshot is advisory.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::Serialize;

use crate::admission::AdmissionControl;
use crate::config::{unix_now, Config};

/// Process-wide delivery statistics.
#[derive(Debug)]
pub struct Stats {
    pid: u32,
    start_at: i64,
    prev_uptime: AtomicI64,
    request_count: AtomicI64,
    sent_count: AtomicI64,
    err_count: AtomicI64,
    retry_count: AtomicI64,
    workers: AtomicI64,
    certificate_not_after: Option<i64>,
}

/// Queue depths sampled at snapshot time.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueGauges {
    pub queue_size: usize,
    pub retry_queue_size: usize,
    pub workers_queue_size: usize,
    pub command_queue_size: usize,
}

/// JSON shape served by `/stats/app`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub pid: u32,
    pub uptime: i64,
    pub start_at: i64,
    pub su_at: i64,
    pub period: i64,
    pub retry_after: i64,
    pub workers: i64,
    pub queue_size: usize,
    pub retry_queue_size: usize,
    pub workers_queue_size: usize,
    pub command_queue_size: usize,
    pub retry_count: i64,
    pub req_count: i64,
    pub sent_count: i64,
    pub err_count: i64,
    pub certificate_not_after: i64,
    pub certificate_expire_until: i64,
}

impl Stats {
    pub fn new(config: &Config) -> Stats {
        Stats {
            pid: std::process::id(),
            start_at: unix_now(),
            prev_uptime: AtomicI64::new(0),
            request_count: AtomicI64::new(0),
            sent_count: AtomicI64::new(0),
            err_count: AtomicI64::new(0),
            retry_count: AtomicI64::new(0),
            workers: AtomicI64::new(0),
            certificate_not_after: config
                .apns
                .as_ref()
                .and_then(|apns| apns.certificate_not_after),
        }
    }

    pub fn incr_requests(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_sent(&self) {
        self.sent_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_errors(&self) {
        self.err_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_retries(&self) {
        self.retry_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_started(&self) {
        self.workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_stopped(&self) {
        self.workers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn request_count(&self) -> i64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn sent_count(&self) -> i64 {
        self.sent_count.load(Ordering::Relaxed)
    }

    pub fn err_count(&self) -> i64 {
        self.err_count.load(Ordering::Relaxed)
    }

    pub fn retry_count(&self) -> i64 {
        self.retry_count.load(Ordering::Relaxed)
    }

    pub fn workers(&self) -> i64 {
        self.workers.load(Ordering::Relaxed)
    }

    /// Assemble the `/stats/app` payload. `period` is the seconds elapsed
    /// since the previous snapshot.
    pub fn snapshot(&self, admission: &AdmissionControl, queues: QueueGauges) -> StatsSnapshot {
        let uptime = unix_now() - self.start_at;
        let prev = self.prev_uptime.swap(uptime, Ordering::Relaxed);
        let certificate_not_after = self.certificate_not_after.unwrap_or_default();
        StatsSnapshot {
            pid: self.pid,
            uptime,
            start_at: self.start_at,
            su_at: admission.last_unavailable_at(),
            period: uptime - prev,
            retry_after: admission.retry_after(),
            workers: self.workers(),
            queue_size: queues.queue_size,
            retry_queue_size: queues.retry_queue_size,
            workers_queue_size: queues.workers_queue_size,
            command_queue_size: queues.command_queue_size,
            retry_count: self.retry_count(),
            req_count: self.request_count(),
            sent_count: self.sent_count(),
            err_count: self.err_count(),
            certificate_not_after,
            certificate_expire_until: if certificate_not_after == 0 {
                0
            } else {
                certificate_not_after - unix_now()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = Stats::new(&Config::default());
        stats.incr_requests();
        stats.incr_sent();
        stats.incr_sent();
        stats.incr_errors();
        stats.incr_retries();
        assert_eq!(stats.request_count(), 1);
        assert_eq!(stats.sent_count(), 2);
        assert_eq!(stats.err_count(), 1);
        assert_eq!(stats.retry_count(), 1);
    }

    #[test]
    fn snapshot_reflects_counters_and_gauges() {
        let stats = Stats::new(&Config::default());
        let admission = AdmissionControl::new();
        stats.worker_started();
        stats.incr_sent();

        let snapshot = stats.snapshot(
            &admission,
            QueueGauges { queue_size: 3, retry_queue_size: 1, ..QueueGauges::default() },
        );
        assert_eq!(snapshot.workers, 1);
        assert_eq!(snapshot.sent_count, 1);
        assert_eq!(snapshot.queue_size, 3);
        assert_eq!(snapshot.retry_queue_size, 1);
        assert_eq!(snapshot.retry_after, crate::admission::RETRY_AFTER_SECOND);

        let encoded = serde_json::to_value(&snapshot).unwrap();
        assert!(encoded.get("req_count").is_some());
        assert!(encoded.get("su_at").is_some());
    }
}
