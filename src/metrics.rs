//! Lightweight global metrics for QuiverStash.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - save / restore (memory vs disk)
//! - background flush (writes, self-cancel, bounded wait)
//! - durable store (warm-load, I/O errors, decode failures)

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

// ----- Save / Restore -----
static SAVES_TOTAL: AtomicU64 = AtomicU64::new(0);
static RESTORE_MEMORY_HITS: AtomicU64 = AtomicU64::new(0);
static RESTORE_DISK_HITS: AtomicU64 = AtomicU64::new(0);
static RESTORE_MISSES: AtomicU64 = AtomicU64::new(0);

// ----- Flush -----
static FLUSH_WRITES: AtomicU64 = AtomicU64::new(0);
static FLUSH_BYTES: AtomicU64 = AtomicU64::new(0);
static FLUSH_SELF_CANCELS: AtomicU64 = AtomicU64::new(0);
static FLUSH_WAIT_TIMEOUTS: AtomicU64 = AtomicU64::new(0);
static OVERSIZED_SNAPSHOTS: AtomicU64 = AtomicU64::new(0);

// ----- Durable store -----
static WARM_LOADED_RECORDS: AtomicU64 = AtomicU64::new(0);
static WARM_LOAD_TIMEOUTS: AtomicU64 = AtomicU64::new(0);
static DECODE_FAILURES: AtomicU64 = AtomicU64::new(0);
static IO_ERRORS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub saves_total: u64,
    pub restore_memory_hits: u64,
    pub restore_disk_hits: u64,
    pub restore_misses: u64,

    pub flush_writes: u64,
    pub flush_bytes: u64,
    pub flush_self_cancels: u64,
    pub flush_wait_timeouts: u64,
    pub oversized_snapshots: u64,

    pub warm_loaded_records: u64,
    pub warm_load_timeouts: u64,
    pub decode_failures: u64,
    pub io_errors: u64,
}

impl MetricsSnapshot {
    /// Share of restores served without touching the durable store.
    pub fn memory_hit_ratio(&self) -> f64 {
        let total = self.restore_memory_hits + self.restore_disk_hits;
        if total == 0 {
            0.0
        } else {
            self.restore_memory_hits as f64 / total as f64
        }
    }

    pub fn avg_flush_bytes(&self) -> f64 {
        if self.flush_writes == 0 {
            0.0
        } else {
            self.flush_bytes as f64 / self.flush_writes as f64
        }
    }
}

// ----- Recorders (Save / Restore) -----
pub fn record_save() {
    SAVES_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn record_restore_memory_hit() {
    RESTORE_MEMORY_HITS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_restore_disk_hit() {
    RESTORE_DISK_HITS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_restore_miss() {
    RESTORE_MISSES.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Flush) -----
pub fn record_flush_write(bytes: usize) {
    FLUSH_WRITES.fetch_add(1, Ordering::Relaxed);
    FLUSH_BYTES.fetch_add(bytes as u64, Ordering::Relaxed);
}

pub fn record_flush_self_cancel() {
    FLUSH_SELF_CANCELS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_flush_wait_timeout() {
    FLUSH_WAIT_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_oversized() {
    OVERSIZED_SNAPSHOTS.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Durable store) -----
pub fn record_warm_loaded(records: u64) {
    WARM_LOADED_RECORDS.fetch_add(records, Ordering::Relaxed);
}

pub fn record_warm_load_timeout() {
    WARM_LOAD_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_decode_failure() {
    DECODE_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_io_error() {
    IO_ERRORS.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        saves_total: SAVES_TOTAL.load(Ordering::Relaxed),
        restore_memory_hits: RESTORE_MEMORY_HITS.load(Ordering::Relaxed),
        restore_disk_hits: RESTORE_DISK_HITS.load(Ordering::Relaxed),
        restore_misses: RESTORE_MISSES.load(Ordering::Relaxed),

        flush_writes: FLUSH_WRITES.load(Ordering::Relaxed),
        flush_bytes: FLUSH_BYTES.load(Ordering::Relaxed),
        flush_self_cancels: FLUSH_SELF_CANCELS.load(Ordering::Relaxed),
        flush_wait_timeouts: FLUSH_WAIT_TIMEOUTS.load(Ordering::Relaxed),
        oversized_snapshots: OVERSIZED_SNAPSHOTS.load(Ordering::Relaxed),

        warm_loaded_records: WARM_LOADED_RECORDS.load(Ordering::Relaxed),
        warm_load_timeouts: WARM_LOAD_TIMEOUTS.load(Ordering::Relaxed),
        decode_failures: DECODE_FAILURES.load(Ordering::Relaxed),
        io_errors: IO_ERRORS.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    SAVES_TOTAL.store(0, Ordering::Relaxed);
    RESTORE_MEMORY_HITS.store(0, Ordering::Relaxed);
    RESTORE_DISK_HITS.store(0, Ordering::Relaxed);
    RESTORE_MISSES.store(0, Ordering::Relaxed);

    FLUSH_WRITES.store(0, Ordering::Relaxed);
    FLUSH_BYTES.store(0, Ordering::Relaxed);
    FLUSH_SELF_CANCELS.store(0, Ordering::Relaxed);
    FLUSH_WAIT_TIMEOUTS.store(0, Ordering::Relaxed);
    OVERSIZED_SNAPSHOTS.store(0, Ordering::Relaxed);

    WARM_LOADED_RECORDS.store(0, Ordering::Relaxed);
    WARM_LOAD_TIMEOUTS.store(0, Ordering::Relaxed);
    DECODE_FAILURES.store(0, Ordering::Relaxed);
    IO_ERRORS.store(0, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_ratios() {
        let m = MetricsSnapshot {
            restore_memory_hits: 3,
            restore_disk_hits: 1,
            flush_writes: 4,
            flush_bytes: 1000,
            ..Default::default()
        };
        assert!((m.memory_hit_ratio() - 0.75).abs() < 1e-9);
        assert!((m.avg_flush_bytes() - 250.0).abs() < 1e-9);
        assert_eq!(MetricsSnapshot::default().memory_hit_ratio(), 0.0);
    }
}
