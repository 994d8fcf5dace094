use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of compute pipeline cache counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    /// Requests answered by an already published variant
    pub hits: u64,
    /// Variants compiled, including ones discarded after losing a race
    pub compiled: u64,
    /// Compiled variants destroyed because another thread published first
    pub discarded: u64,
    /// Compilations the driver rejected
    pub failed: u64,
    /// Compilations seeded with data from the persistent store
    pub store_hits: u64,
    /// Variants currently published
    pub live: u64,
}

impl Add for PipelineStatsSnapshot {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            hits: self.hits + rhs.hits,
            compiled: self.compiled + rhs.compiled,
            discarded: self.discarded + rhs.discarded,
            failed: self.failed + rhs.failed,
            store_hits: self.store_hits + rhs.store_hits,
            live: self.live + rhs.live,
        }
    }
}

/// Counters updated on the dispatch path; relaxed atomics only.
#[derive(Debug, Default)]
pub struct PipelineStats {
    hits: AtomicU64,
    compiled: AtomicU64,
    discarded: AtomicU64,
    failed: AtomicU64,
    store_hits: AtomicU64,
}

impl PipelineStats {
    pub fn inc_hits(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_compiled(&self) {
        self.compiled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_store_hits(&self) {
        self.store_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, live: u64) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            compiled: self.compiled.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            store_hits: self.store_hits.load(Ordering::Relaxed),
            live,
        }
    }
}
