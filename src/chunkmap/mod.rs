//! chunkmap — the live divergence bitmap, published as immutable snapshots.
//!
//! Readers: `guard()` / `snapshot()` never block; a bit test is O(1) on the
//! snapshot they hold. A snapshot stays valid for its holder even while a commit
//! replaces it, and is freed once the last holder drops it (arc-swap debt list
//! plus `Arc` refcount act as the grace period).
//!
//! Writers: exactly one at a time, through `lock()`. The holder re-tests the bit,
//! stages a copy with the bit set, and publishes the copy only after the caller
//! made it durable. Dropping a staged copy is the rollback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use log::debug;
use parking_lot::{Mutex, MutexGuard};

use crate::metrics::record_snapshot_published;

pub mod bitmap;

pub use bitmap::DivergenceBitmap;

/// Shared read handle to one published bitmap.
pub type Snapshot = Arc<DivergenceBitmap>;

pub struct ChunkMap {
    current: ArcSwap<DivergenceBitmap>,
    commit_lock: Mutex<()>,
    generation: AtomicU64,
}

impl ChunkMap {
    pub fn new(initial: DivergenceBitmap) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            commit_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Borrow the current snapshot without touching its refcount.
    /// Keep the guard short-lived; use `snapshot()` to hold it across I/O.
    #[inline]
    pub fn guard(&self) -> arc_swap::Guard<Snapshot> {
        self.current.load()
    }

    /// Owned reference to the current snapshot.
    #[inline]
    pub fn snapshot(&self) -> Snapshot {
        self.current.load_full()
    }

    /// Number of snapshots published since attach.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Take the commit lock. Blocks behind any other committer.
    pub fn lock(&self) -> CommitGuard<'_> {
        CommitGuard {
            map: self,
            _held: self.commit_lock.lock(),
        }
    }
}

/// Proof of holding the commit lock.
pub struct CommitGuard<'a> {
    map: &'a ChunkMap,
    _held: MutexGuard<'a, ()>,
}

/// A bitmap with one extra bit set, not yet visible to readers.
#[derive(Debug)]
pub struct StagedBitmap {
    chunk: u64,
    bitmap: DivergenceBitmap,
}

impl StagedBitmap {
    pub fn bitmap(&self) -> &DivergenceBitmap {
        &self.bitmap
    }
}

impl CommitGuard<'_> {
    /// Locked re-test. Nobody else can publish while this guard lives.
    pub fn is_diverged(&self, chunk: u64) -> bool {
        self.map.current.load().test(chunk)
    }

    /// Copy the live bitmap with `chunk` set. Returns None if it is already set.
    pub fn stage(&self, chunk: u64) -> Option<StagedBitmap> {
        let live = self.map.current.load();
        if live.test(chunk) {
            return None;
        }
        Some(StagedBitmap {
            chunk,
            bitmap: live.with_bit(chunk, true),
        })
    }

    /// Make a staged bitmap the current snapshot.
    pub fn publish(&self, staged: StagedBitmap) {
        let chunk = staged.chunk;
        self.map.current.store(Arc::new(staged.bitmap));
        let gen = self.map.generation.fetch_add(1, Ordering::AcqRel) + 1;
        record_snapshot_published();
        debug!("chunk {} published in snapshot generation {}", chunk, gen);
    }

    /// Discard a staged bitmap; readers never saw it.
    pub fn rollback(&self, staged: StagedBitmap) {
        debug!("chunk {} rolled back before publication", staged.chunk);
        drop(staged);
    }
}
