//! Lightweight global metrics for virt-cow.
//!
//! Thread-safe relaxed atomic counters, grouped by subsystem:
//! - Routing (classify)
//! - Copy jobs
//! - Bitmap commits / snapshots

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// ----- Routing -----
static READS_ORIGIN: AtomicU64 = AtomicU64::new(0);
static READS_COW: AtomicU64 = AtomicU64::new(0);
static WRITES_COW_DIRECT: AtomicU64 = AtomicU64::new(0);
static BOUNDS_REJECTS: AtomicU64 = AtomicU64::new(0);
static POOL_EXHAUSTED: AtomicU64 = AtomicU64::new(0);

// ----- Copy jobs -----
static JOBS_SCHEDULED: AtomicU64 = AtomicU64::new(0);
static COPIES_PERFORMED: AtomicU64 = AtomicU64::new(0);
static COPY_FAILURES: AtomicU64 = AtomicU64::new(0);
static RACES_LOST: AtomicU64 = AtomicU64::new(0);

// ----- Commits -----
static COMMITS_PERSISTED: AtomicU64 = AtomicU64::new(0);
static PERSIST_FAILURES: AtomicU64 = AtomicU64::new(0);
static SNAPSHOTS_PUBLISHED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    // Routing
    pub reads_origin: u64,
    pub reads_cow: u64,
    pub writes_cow_direct: u64,
    pub bounds_rejects: u64,
    pub pool_exhausted: u64,

    // Copy jobs
    pub jobs_scheduled: u64,
    pub copies_performed: u64,
    pub copy_failures: u64,
    pub races_lost: u64,

    // Commits
    pub commits_persisted: u64,
    pub persist_failures: u64,
    pub snapshots_published: u64,
}

impl MetricsSnapshot {
    /// Fraction of scheduled jobs that found their chunk already diverged.
    pub fn race_ratio(&self) -> f64 {
        if self.jobs_scheduled == 0 {
            0.0
        } else {
            self.races_lost as f64 / self.jobs_scheduled as f64
        }
    }
}

// ----- Recorders (Routing) -----
pub fn record_read_origin() {
    READS_ORIGIN.fetch_add(1, Ordering::Relaxed);
}
pub fn record_read_cow() {
    READS_COW.fetch_add(1, Ordering::Relaxed);
}
pub fn record_write_cow_direct() {
    WRITES_COW_DIRECT.fetch_add(1, Ordering::Relaxed);
}
pub fn record_bounds_reject() {
    BOUNDS_REJECTS.fetch_add(1, Ordering::Relaxed);
}
pub fn record_pool_exhausted() {
    POOL_EXHAUSTED.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Copy jobs) -----
pub fn record_job_scheduled() {
    JOBS_SCHEDULED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_copy_performed() {
    COPIES_PERFORMED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_copy_failure() {
    COPY_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn record_race_lost() {
    RACES_LOST.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Commits) -----
pub fn record_commit_persisted() {
    COMMITS_PERSISTED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_persist_failure() {
    PERSIST_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn record_snapshot_published() {
    SNAPSHOTS_PUBLISHED.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        reads_origin: READS_ORIGIN.load(Ordering::Relaxed),
        reads_cow: READS_COW.load(Ordering::Relaxed),
        writes_cow_direct: WRITES_COW_DIRECT.load(Ordering::Relaxed),
        bounds_rejects: BOUNDS_REJECTS.load(Ordering::Relaxed),
        pool_exhausted: POOL_EXHAUSTED.load(Ordering::Relaxed),

        jobs_scheduled: JOBS_SCHEDULED.load(Ordering::Relaxed),
        copies_performed: COPIES_PERFORMED.load(Ordering::Relaxed),
        copy_failures: COPY_FAILURES.load(Ordering::Relaxed),
        races_lost: RACES_LOST.load(Ordering::Relaxed),

        commits_persisted: COMMITS_PERSISTED.load(Ordering::Relaxed),
        persist_failures: PERSIST_FAILURES.load(Ordering::Relaxed),
        snapshots_published: SNAPSHOTS_PUBLISHED.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    for c in [
        &READS_ORIGIN,
        &READS_COW,
        &WRITES_COW_DIRECT,
        &BOUNDS_REJECTS,
        &POOL_EXHAUSTED,
        &JOBS_SCHEDULED,
        &COPIES_PERFORMED,
        &COPY_FAILURES,
        &RACES_LOST,
        &COMMITS_PERSISTED,
        &PERSIST_FAILURES,
        &SNAPSHOTS_PUBLISHED,
    ] {
        c.store(0, Ordering::Relaxed);
    }
}
