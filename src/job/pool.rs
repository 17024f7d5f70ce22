//! job/pool — bounded free-list of copy-job slots.
//!
//! Each slot owns a chunk-sized bounce buffer, allocated once at attach, so a
//! copy never allocates on the I/O path. `acquire()` never blocks: an empty
//! pool is reported to the caller, who rejects the request as retryable.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::consts::CHUNK_SIZE;

struct PoolInner {
    free: Mutex<Vec<Box<[u8]>>>,
    capacity: usize,
}

#[derive(Clone)]
pub struct JobPool {
    inner: Arc<PoolInner>,
}

impl JobPool {
    pub fn new(capacity: usize) -> Self {
        let free = (0..capacity)
            .map(|_| vec![0u8; CHUNK_SIZE].into_boxed_slice())
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Take a slot, or None if all are in use.
    pub fn acquire(&self) -> Option<JobSlot> {
        let buf = self.inner.free.lock().pop()?;
        Some(JobSlot {
            buf: Some(buf),
            pool: Arc::clone(&self.inner),
        })
    }
}

/// A pooled chunk buffer; returns to the pool on drop.
pub struct JobSlot {
    buf: Option<Box<[u8]>>,
    pool: Arc<PoolInner>,
}

impl JobSlot {
    pub fn buf_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }

    pub fn buf(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl Drop for JobSlot {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.free.lock().push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_is_reported_and_slots_come_back() {
        let pool = JobPool::new(2);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        assert_eq!(pool.available(), 0);
        drop(a);
        assert_eq!(pool.available(), 1);
        let c = pool.acquire().unwrap();
        assert_eq!(c.buf().len(), CHUNK_SIZE);
        drop(b);
        drop(c);
        assert_eq!(pool.available(), pool.capacity());
    }
}
