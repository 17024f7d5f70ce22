//! device/mem — MemDevice: RAM-backed device with fault injection.
//!
//! Faults are armed per sector range and op kind, either persistently or for a
//! fixed number of hits. Reads can be held behind a gate so tests can line up
//! concurrent requests against the same chunk before any copy completes.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex, RwLock};

use super::{check_range, BlockDevice};
use crate::consts::SECTOR_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Read,
    Write,
    /// Only writes issued with `durable = true`.
    DurableWrite,
}

#[derive(Debug, Clone)]
struct Fault {
    kind: FaultKind,
    start: u64,
    end: u64,
    remaining: Option<u32>,
}

/// One recorded write: (sector, count, durable).
pub type WriteRecord = (u64, u64, bool);

#[derive(Debug)]
pub struct MemDevice {
    data: RwLock<Vec<u8>>,
    len_sectors: u64,
    faults: Mutex<Vec<Fault>>,
    writes: Mutex<Vec<WriteRecord>>,
    reads: AtomicU64,
    gate_closed: Mutex<bool>,
    gate_cv: Condvar,
}

impl MemDevice {
    pub fn new(len_sectors: u64) -> Self {
        Self {
            data: RwLock::new(vec![0u8; len_sectors as usize * SECTOR_SIZE]),
            len_sectors,
            faults: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            reads: AtomicU64::new(0),
            gate_closed: Mutex::new(false),
            gate_cv: Condvar::new(),
        }
    }

    /// Device whose sector `s` is filled with `pattern(s)`.
    pub fn with_pattern<F: Fn(u64) -> u8>(len_sectors: u64, pattern: F) -> Self {
        let dev = Self::new(len_sectors);
        {
            let mut data = dev.data.write();
            for s in 0..len_sectors {
                let off = s as usize * SECTOR_SIZE;
                data[off..off + SECTOR_SIZE].fill(pattern(s));
            }
        }
        dev
    }

    /// Arm a fault for sectors `[start, end)`. `hits = None` keeps it armed forever.
    pub fn inject_fault(&self, kind: FaultKind, start: u64, end: u64, hits: Option<u32>) {
        self.faults.lock().push(Fault {
            kind,
            start,
            end,
            remaining: hits,
        });
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Block every subsequent read until `open_read_gate`.
    pub fn close_read_gate(&self) {
        *self.gate_closed.lock() = true;
    }

    pub fn open_read_gate(&self) {
        *self.gate_closed.lock() = false;
        self.gate_cv.notify_all();
    }

    /// Raw copy of `count` sectors, bypassing faults and counters.
    pub fn snapshot_sectors(&self, sector: u64, count: u64) -> Vec<u8> {
        let data = self.data.read();
        let off = sector as usize * SECTOR_SIZE;
        data[off..off + count as usize * SECTOR_SIZE].to_vec()
    }

    /// Raw overwrite, bypassing faults and counters.
    pub fn poke(&self, sector: u64, bytes: &[u8]) {
        let mut data = self.data.write();
        let off = sector as usize * SECTOR_SIZE;
        data[off..off + bytes.len()].copy_from_slice(bytes);
    }

    pub fn reads_total(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn write_log(&self) -> Vec<WriteRecord> {
        self.writes.lock().clone()
    }

    /// Number of recorded writes touching `[start, end)`.
    pub fn writes_in(&self, start: u64, end: u64) -> usize {
        self.writes
            .lock()
            .iter()
            .filter(|(s, n, _)| *s < end && s + n > start)
            .count()
    }

    fn check_fault(&self, kind: FaultKind, sector: u64, count: u64, durable: bool) -> io::Result<()> {
        let mut faults = self.faults.lock();
        for f in faults.iter_mut() {
            let kind_hit = match f.kind {
                FaultKind::Read => kind == FaultKind::Read,
                FaultKind::Write => kind == FaultKind::Write,
                FaultKind::DurableWrite => kind == FaultKind::Write && durable,
            };
            if !kind_hit || sector >= f.end || sector + count <= f.start {
                continue;
            }
            match f.remaining {
                Some(0) => continue,
                Some(ref mut n) => *n -= 1,
                None => {}
            }
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("injected {:?} fault at sector {}", f.kind, sector),
            ));
        }
        Ok(())
    }
}

impl BlockDevice for MemDevice {
    fn len_sectors(&self) -> u64 {
        self.len_sectors
    }

    fn read(&self, sector: u64, buf: &mut [u8]) -> io::Result<()> {
        let count = check_range(self.len_sectors, sector, buf.len())?;
        {
            let mut closed = self.gate_closed.lock();
            while *closed {
                self.gate_cv.wait(&mut closed);
            }
        }
        self.check_fault(FaultKind::Read, sector, count, false)?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        let data = self.data.read();
        let off = sector as usize * SECTOR_SIZE;
        buf.copy_from_slice(&data[off..off + buf.len()]);
        Ok(())
    }

    fn write(&self, sector: u64, buf: &[u8], durable: bool) -> io::Result<()> {
        let count = check_range(self.len_sectors, sector, buf.len())?;
        self.check_fault(FaultKind::Write, sector, count, durable)?;
        {
            let mut data = self.data.write();
            let off = sector as usize * SECTOR_SIZE;
            data[off..off + buf.len()].copy_from_slice(buf);
        }
        self.writes.lock().push((sector, count, durable));
        Ok(())
    }
}
