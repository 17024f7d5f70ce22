//! device — block-I/O primitives consumed by the engine.
//!
//! Submodules:
//! - file.rs — FileDevice: positional I/O on a file or block device node (+ advisory locks).
//! - mem.rs  — MemDevice: in-memory device with fault injection, used by tests and tooling.
//!
//! All addressing is in 512-byte sectors. Buffers must be a whole number of sectors.

use std::io;

use crate::consts::{CHUNK_SECTORS, CHUNK_SHIFT, SECTOR_SIZE};

pub mod file;
pub mod mem;

pub use file::FileDevice;
pub use mem::{FaultKind, MemDevice};

/// Synchronous sector-addressed device.
pub trait BlockDevice: Send + Sync {
    /// Device length in sectors.
    fn len_sectors(&self) -> u64;

    /// Read `buf.len() / 512` sectors starting at `sector`.
    fn read(&self, sector: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write `buf` starting at `sector`. With `durable`, returns only once the
    /// data reached stable storage.
    fn write(&self, sector: u64, buf: &[u8], durable: bool) -> io::Result<()>;
}

/// Validate a sector-granular access against a device of `len_sectors`.
pub(crate) fn check_range(len_sectors: u64, sector: u64, buf_len: usize) -> io::Result<u64> {
    if buf_len % SECTOR_SIZE != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("buffer length {} is not a multiple of {}", buf_len, SECTOR_SIZE),
        ));
    }
    let count = (buf_len / SECTOR_SIZE) as u64;
    let end = sector.checked_add(count).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "sector range overflows u64")
    })?;
    if end > len_sectors {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "access beyond device end: sector={} count={} len={}",
                sector, count, len_sectors
            ),
        ));
    }
    Ok(count)
}

/// Number of whole sectors needed to hold `bytes`.
#[inline]
pub fn sectors_for_bytes(bytes: u64) -> u64 {
    bytes.div_ceil(SECTOR_SIZE as u64)
}

/// Chunk index covering `sector`.
#[inline]
pub fn chunk_of(sector: u64) -> u64 {
    sector >> CHUNK_SHIFT
}

/// Offset of `sector` inside its chunk.
#[inline]
pub fn offset_in_chunk(sector: u64) -> u64 {
    sector & (CHUNK_SECTORS - 1)
}

/// Split `[sector, sector + count)` into pieces that never cross a chunk boundary.
/// Returns `(sector, count)` pairs in ascending order.
pub fn chunk_extents(sector: u64, count: u64) -> Vec<(u64, u64)> {
    let mut out = Vec::new();
    let mut cur = sector;
    let end = sector.saturating_add(count);
    while cur < end {
        let room = CHUNK_SECTORS - offset_in_chunk(cur);
        let n = room.min(end - cur);
        out.push((cur, n));
        cur += n;
    }
    out
}
