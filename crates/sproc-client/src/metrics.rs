//! Process-wide invocation metrics.
//!
//! Counters live behind one short-lived lock so that a snapshot never
//! observes a half-applied update. The lock is never held across an await.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Accumulates per-attempt latency and outcome counts plus pool gauges.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    inner: Mutex<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    totals: CallTotals,
    procedures: HashMap<String, CallTotals>,
    pool: PoolGauges,
}

#[derive(Debug, Default, Clone, Copy)]
struct CallTotals {
    calls: u64,
    successes: u64,
    failures: u64,
    latency_us: u64,
    min_latency_us: Option<u64>,
    max_latency_us: u64,
}

impl CallTotals {
    fn record(&mut self, latency_us: u64, success: bool) {
        self.calls += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.latency_us = self.latency_us.saturating_add(latency_us);
        self.min_latency_us = Some(self.min_latency_us.map_or(latency_us, |m| m.min(latency_us)));
        self.max_latency_us = self.max_latency_us.max(latency_us);
    }

    fn to_stats(self) -> ProcedureStats {
        ProcedureStats {
            calls: self.calls,
            successes: self.successes,
            failures: self.failures,
            total_latency_ms: self.latency_us / 1000,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct PoolGauges {
    active: u32,
    idle: u32,
    waiters: u32,
}

impl MetricsRecorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attempt of `procedure` that took `latency`.
    pub fn record_call(&self, procedure: &str, latency: Duration, success: bool) {
        let latency_us = latency.as_micros().min(u128::from(u64::MAX)) as u64;
        let mut inner = self.inner.lock();
        inner.totals.record(latency_us, success);
        inner
            .procedures
            .entry(procedure.to_string())
            .or_default()
            .record(latency_us, success);
    }

    /// Record the latest pool occupancy.
    pub fn record_pool_snapshot(&self, active: u32, idle: u32, waiters: u32) {
        self.inner.lock().pool = PoolGauges {
            active,
            idle,
            waiters,
        };
    }

    /// Consistent point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        let totals = inner.totals;
        MetricsSnapshot {
            total_calls: totals.calls,
            success_count: totals.successes,
            failure_count: totals.failures,
            total_latency_ms: totals.latency_us / 1000,
            min_latency_ms: totals.min_latency_us.map(|us| us / 1000),
            max_latency_ms: totals.max_latency_us / 1000,
            pool_active: inner.pool.active,
            pool_idle: inner.pool.idle,
            pool_waiters: inner.pool.waiters,
            procedures: inner
                .procedures
                .iter()
                .map(|(name, totals)| (name.clone(), totals.to_stats()))
                .collect(),
        }
    }

    /// Zero all call counters. Pool gauges describe the present and are kept.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.totals = CallTotals::default();
        inner.procedures.clear();
        tracing::debug!("performance metrics cleared");
    }
}

/// Point-in-time view of [`MetricsRecorder`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Attempts recorded.
    pub total_calls: u64,
    /// Attempts that succeeded.
    pub success_count: u64,
    /// Attempts that failed.
    pub failure_count: u64,
    /// Sum of attempt latencies.
    pub total_latency_ms: u64,
    /// Fastest attempt, if any were recorded.
    pub min_latency_ms: Option<u64>,
    /// Slowest attempt.
    pub max_latency_ms: u64,
    /// Connections checked out at the last pool snapshot.
    pub pool_active: u32,
    /// Idle connections at the last pool snapshot.
    pub pool_idle: u32,
    /// Callers waiting for a connection at the last pool snapshot.
    pub pool_waiters: u32,
    /// Breakdown by procedure identifier.
    pub procedures: BTreeMap<String, ProcedureStats>,
}

impl MetricsSnapshot {
    /// Mean attempt latency in milliseconds.
    #[must_use]
    pub fn average_latency_ms(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.total_latency_ms as f64 / self.total_calls as f64
    }

    /// Fraction of attempts that succeeded (1.0 when nothing was recorded).
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 1.0;
        }
        self.success_count as f64 / self.total_calls as f64
    }
}

/// Counters for a single procedure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcedureStats {
    /// Attempts recorded.
    pub calls: u64,
    /// Attempts that succeeded.
    pub successes: u64,
    /// Attempts that failed.
    pub failures: u64,
    /// Sum of attempt latencies.
    pub total_latency_ms: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let recorder = MetricsRecorder::new();
        recorder.record_call("charge", Duration::from_millis(10), true);
        recorder.record_call("charge", Duration::from_millis(30), false);
        recorder.record_call("refund", Duration::from_millis(20), true);
        recorder.record_pool_snapshot(2, 3, 1);

        let snap = recorder.snapshot();
        assert_eq!(snap.total_calls, 3);
        assert_eq!(snap.success_count, 2);
        assert_eq!(snap.failure_count, 1);
        assert_eq!(snap.total_latency_ms, 60);
        assert_eq!(snap.min_latency_ms, Some(10));
        assert_eq!(snap.max_latency_ms, 30);
        assert_eq!((snap.pool_active, snap.pool_idle, snap.pool_waiters), (2, 3, 1));
        assert!((snap.average_latency_ms() - 20.0).abs() < f64::EPSILON);

        let charge = snap.procedures["charge"];
        assert_eq!(charge.calls, 2);
        assert_eq!(charge.failures, 1);
    }

    #[test]
    fn test_reset_zeroes_calls_but_keeps_pool_gauges() {
        let recorder = MetricsRecorder::new();
        recorder.record_call("charge", Duration::from_millis(5), true);
        recorder.record_pool_snapshot(1, 4, 0);
        recorder.reset();

        let snap = recorder.snapshot();
        assert_eq!(snap.total_calls, 0);
        assert_eq!(snap.min_latency_ms, None);
        assert!(snap.procedures.is_empty());
        assert_eq!(snap.pool_idle, 4);
        assert!((snap.success_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_recording_loses_no_updates() {
        let recorder = Arc::new(MetricsRecorder::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let recorder = Arc::clone(&recorder);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        recorder.record_call("p", Duration::from_micros(1), true);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let snap = recorder.snapshot();
        assert_eq!(snap.total_calls, 8000);
        assert_eq!(snap.success_count, 8000);
        assert_eq!(snap.procedures["p"].calls, 8000);
    }

    #[test]
    fn test_snapshot_is_internally_consistent_under_contention() {
        let recorder = Arc::new(MetricsRecorder::new());
        let writer = {
            let recorder = Arc::clone(&recorder);
            std::thread::spawn(move || {
                for i in 0..5000 {
                    recorder.record_call("p", Duration::from_micros(1), i % 2 == 0);
                    if i % 1000 == 0 {
                        recorder.reset();
                    }
                }
            })
        };

        for _ in 0..500 {
            let snap = recorder.snapshot();
            assert_eq!(snap.total_calls, snap.success_count + snap.failure_count);
        }
        writer.join().unwrap();
    }
}
