//! Geometry constants shared by the on-disk format and the routing layer.
//!
//! None of these are tunable at attach time: the persisted bitmap layout
//! depends on every one of them.

// -------- Sectors --------
pub const SECTOR_SHIFT: u32 = 9;
pub const SECTOR_SIZE: usize = 1 << SECTOR_SHIFT; // 512

// -------- Chunks --------
// A chunk is the unit of divergence: it lives entirely on origin or entirely on CoW.
pub const CHUNK_SIZE: usize = 4096;
pub const CHUNK_SECTORS: u64 = (CHUNK_SIZE / SECTOR_SIZE) as u64; // 8
pub const CHUNK_SHIFT: u32 = CHUNK_SECTORS.trailing_zeros(); // 3

// -------- Metadata region (CoW device, sector 0) --------
// Layout:
// [bitmap sector 0][bitmap sector 1]...[bitmap sector 7] | data area ...
// bit i = chunk i diverged; zero padding past nr_chunks.
pub const METADATA_SECTORS: u64 = 8;
pub const METADATA_BYTES: usize = METADATA_SECTORS as usize * SECTOR_SIZE; // 4096
pub const BITS_PER_SECTOR: u64 = (SECTOR_SIZE * 8) as u64; // 4096 chunks per metadata sector

// Bitmap is kept as 64-bit words (little-endian on disk).
pub const BITMAP_WORD_BITS: u64 = 64;
pub const WORDS_PER_SECTOR: usize = SECTOR_SIZE / 8;

// -------- Jobs --------
pub const JOB_POOL_CAPACITY: usize = 256;
pub const DEFAULT_WORKERS: usize = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_geometry_is_consistent() {
        assert_eq!(CHUNK_SECTORS, 8);
        assert_eq!(CHUNK_SHIFT, 3);
        assert_eq!(1u64 << CHUNK_SHIFT, CHUNK_SECTORS);
        assert_eq!(METADATA_BYTES, 4096);
        assert_eq!(BITS_PER_SECTOR, 4096);
        assert_eq!(WORDS_PER_SECTOR as u64 * BITMAP_WORD_BITS, BITS_PER_SECTOR);
    }
}
