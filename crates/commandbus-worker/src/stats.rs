//! Worker observability snapshot (ambient addition, SPEC_FULL §4.4), grounded
//! in the teacher's `EventDrivenStats`/`WorkerEventSystem` statistics split:
//! plain atomics rather than a polled external metrics system, read by the
//! CLI and by tests.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    pub messages_processed: u64,
    pub messages_failed: u64,
    pub messages_tsq: u64,
    pub in_flight: i64,
    pub listener_connected: bool,
}

#[derive(Debug, Default)]
pub struct WorkerStats {
    messages_processed: AtomicU64,
    messages_failed: AtomicU64,
    messages_tsq: AtomicU64,
    in_flight: AtomicI64,
    listener_connected: AtomicBool,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_completed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tsq(&self) {
        self.messages_tsq.fetch_add(1, Ordering::Relaxed);
    }

    pub fn enter_dispatch(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn exit_dispatch(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn set_listener_connected(&self, connected: bool) {
        self.listener_connected.store(connected, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            messages_tsq: self.messages_tsq.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            listener_connected: self.listener_connected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counters() {
        let stats = WorkerStats::new();
        stats.record_completed();
        stats.record_completed();
        stats.record_failed();
        stats.record_tsq();
        stats.enter_dispatch();
        stats.set_listener_connected(true);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_processed, 2);
        assert_eq!(snapshot.messages_failed, 1);
        assert_eq!(snapshot.messages_tsq, 1);
        assert_eq!(snapshot.in_flight, 1);
        assert!(snapshot.listener_connected);
    }
}
