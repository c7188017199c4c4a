//! Per-loop cycle statistics
//!
//! Kept behind their own `parking_lot::RwLock` so reporting never contends
//! with the vehicle-state lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

/// Counters for one control loop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    pub cycles: u64,
    pub init_failures: u64,
    pub last_compute_us: u64,
    pub max_compute_us: u64,
    /// Time spent waiting for the state lock in the last cycle
    pub last_lock_wait_us: u64,
    pub max_lock_wait_us: u64,
}

impl CycleStats {
    fn record(&mut self, lock_wait: Duration, compute: Duration) {
        let wait_us = lock_wait.as_micros() as u64;
        let compute_us = compute.as_micros() as u64;
        self.cycles += 1;
        self.last_lock_wait_us = wait_us;
        self.max_lock_wait_us = self.max_lock_wait_us.max(wait_us);
        self.last_compute_us = compute_us;
        self.max_compute_us = self.max_compute_us.max(compute_us);
    }
}

/// Shared stats for every registered loop, keyed by loop name
#[derive(Debug, Clone, Default)]
pub struct StatsRegistry {
    inner: Arc<RwLock<BTreeMap<&'static str, CycleStats>>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self, name: &'static str, lock_wait: Duration, compute: Duration) {
        self.inner
            .write()
            .entry(name)
            .or_default()
            .record(lock_wait, compute);
    }

    pub fn record_init_failure(&self, name: &'static str) {
        self.inner.write().entry(name).or_default().init_failures += 1;
    }

    pub fn get(&self, name: &str) -> Option<CycleStats> {
        self.inner.read().get(name).cloned()
    }

    /// Copy of every loop's stats
    pub fn snapshot(&self) -> BTreeMap<&'static str, CycleStats> {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_cycle() {
        let stats = StatsRegistry::new();
        stats.record_cycle("torque", Duration::from_micros(30), Duration::from_micros(100));
        stats.record_cycle("torque", Duration::from_micros(10), Duration::from_micros(40));

        let torque = stats.get("torque").unwrap();
        assert_eq!(torque.cycles, 2);
        assert_eq!(torque.last_compute_us, 40);
        assert_eq!(torque.max_compute_us, 100);
        assert_eq!(torque.last_lock_wait_us, 10);
        assert_eq!(torque.max_lock_wait_us, 30);
        assert!(stats.get("regen").is_none());
    }

    #[test]
    fn test_init_failures_counted_separately() {
        let stats = StatsRegistry::new();
        stats.record_init_failure("traction");
        let snapshot = stats.snapshot();
        assert_eq!(snapshot["traction"].init_failures, 1);
        assert_eq!(snapshot["traction"].cycles, 0);
    }
}
