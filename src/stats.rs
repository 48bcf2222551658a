#![forbid(unsafe_code)]

//! Shared dispatch counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::dispatch::Classification;

/// Process-wide dispatch counters, updated by every dispatch on both ingress
/// surfaces.
///
/// Constructed once at startup and injected as `Arc`; there is no ambient
/// global. Counters are monotonic and read independently, so relaxed ordering
/// is sufficient.
#[derive(Debug)]
pub struct StatsRegister {
    started: Instant,
    processed: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    last_ms: AtomicU64,
}

/// Point-in-time view of the register, served by `GET /stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub success: u64,
    pub failure: u64,
    pub last_ms: u64,
    pub uptime_seconds: f64,
}

impl Default for StatsRegister {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsRegister {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            processed: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            last_ms: AtomicU64::new(0),
        }
    }

    /// Record one completed dispatch: `processed` always increments, exactly
    /// one of `success`/`failure` increments, `last_ms` is overwritten.
    pub fn record(&self, classification: Classification, latency_ms: u64) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if classification.is_failure() {
            self.failure.fetch_add(1, Ordering::Relaxed);
        } else {
            self.success.fetch_add(1, Ordering::Relaxed);
        }
        self.last_ms.store(latency_ms, Ordering::Relaxed);
    }

    /// Seconds since construction, rounded to two decimal places.
    pub fn uptime_seconds(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        (elapsed * 100.0).round() / 100.0
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            failure: self.failure.load(Ordering::Relaxed),
            last_ms: self.last_ms.load(Ordering::Relaxed),
            uptime_seconds: self.uptime_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_keeps_processed_equal_to_success_plus_failure() {
        let stats = StatsRegister::new();
        stats.record(Classification::Success, 10);
        stats.record(Classification::ModelError, 20);
        stats.record(Classification::UnhandledError, 30);
        stats.record(Classification::Success, 5);

        let snap = stats.snapshot();
        assert_eq!(snap.processed, 4);
        assert_eq!(snap.success, 2);
        assert_eq!(snap.failure, 2);
        assert_eq!(snap.processed, snap.success + snap.failure);
    }

    #[test]
    fn last_ms_is_overwritten_each_dispatch() {
        let stats = StatsRegister::new();
        stats.record(Classification::Success, 42);
        assert_eq!(stats.snapshot().last_ms, 42);
        stats.record(Classification::ModelError, 7);
        assert_eq!(stats.snapshot().last_ms, 7);
    }

    #[test]
    fn snapshot_serializes_the_full_counter_set() {
        let stats = StatsRegister::new();
        stats.record(Classification::Success, 3);

        let value = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(value["processed"], 1);
        assert_eq!(value["success"], 1);
        assert_eq!(value["failure"], 0);
        assert_eq!(value["last_ms"], 3);
        assert!(value["uptime_seconds"].is_number());
    }

    #[test]
    fn shared_register_accepts_concurrent_updates() {
        use std::sync::Arc;

        let stats = Arc::new(StatsRegister::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let stats = stats.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let class = if i % 2 == 0 {
                        Classification::Success
                    } else {
                        Classification::UnhandledError
                    };
                    stats.record(class, i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.processed, 800);
        assert_eq!(snap.processed, snap.success + snap.failure);
    }
}
