//! metadata/layout — geometry derived from the origin length.
//!
//! CoW device layout (sectors):
//! [0 .. METADATA_SECTORS)          bitmap, `sectors_needed` of them in use
//! [METADATA_SECTORS .. )           data area, chunk c at METADATA_SECTORS + c * CHUNK_SECTORS

use serde::Serialize;

use crate::consts::{
    BITMAP_WORD_BITS, BITS_PER_SECTOR, CHUNK_SECTORS, METADATA_SECTORS, SECTOR_SIZE,
};
use crate::error::{CowError, CowResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetadataLayout {
    pub origin_sectors: u64,
    pub nr_chunks: u64,
    /// Bitmap size rounded to 64-bit words, then to whole sectors.
    pub bitmap_bytes: u64,
    pub sectors_needed: u64,
    pub reserved_sectors: u64,
}

impl MetadataLayout {
    pub fn for_origin(origin_sectors: u64) -> CowResult<Self> {
        if origin_sectors == 0 {
            return Err(CowError::Config("origin device is empty".into()));
        }
        let nr_chunks = origin_sectors.div_ceil(CHUNK_SECTORS);
        let words = nr_chunks.div_ceil(BITMAP_WORD_BITS);
        let bitmap_bytes = (words * 8).next_multiple_of(SECTOR_SIZE as u64);
        let sectors_needed = bitmap_bytes / SECTOR_SIZE as u64;

        if sectors_needed > METADATA_SECTORS {
            return Err(CowError::Config(format!(
                "metadata too large for reserved area: {} chunks need {} sectors, max {}",
                nr_chunks, sectors_needed, METADATA_SECTORS
            )));
        }

        Ok(Self {
            origin_sectors,
            nr_chunks,
            bitmap_bytes,
            sectors_needed,
            reserved_sectors: METADATA_SECTORS,
        })
    }

    /// Largest origin (in sectors) whose bitmap still fits the reserved region.
    pub fn max_origin_sectors() -> u64 {
        METADATA_SECTORS * BITS_PER_SECTOR * CHUNK_SECTORS
    }

    /// Metadata sector holding the bit of `chunk`.
    #[inline]
    pub fn sector_of(chunk: u64) -> u64 {
        chunk / BITS_PER_SECTOR
    }

    /// First sector of `chunk`'s slot in the CoW data area.
    #[inline]
    pub fn data_sector(&self, chunk: u64) -> u64 {
        self.reserved_sectors + chunk * CHUNK_SECTORS
    }

    /// Minimum CoW device length able to hold every chunk.
    pub fn required_cow_sectors(&self) -> u64 {
        self.reserved_sectors + self.nr_chunks * CHUNK_SECTORS
    }

    /// Sectors of `chunk` that actually exist on the origin (the last chunk may be short).
    pub fn origin_sectors_in_chunk(&self, chunk: u64) -> u64 {
        let start = chunk * CHUNK_SECTORS;
        self.origin_sectors.saturating_sub(start).min(CHUNK_SECTORS)
    }
}
