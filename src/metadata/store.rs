//! metadata/store — MetadataStore: bitmap persistence in the CoW reserved region.
//!
//! - load():           whole-bitmap read at attach; unread tail stays "not diverged".
//! - persist_sector(): one durable sector write per commit, regardless of device size.
//! - format():         zero the reserved region of a fresh CoW device.
//! - check():          padding validation for tooling.

use std::sync::Arc;

use log::{debug, error};
use serde::Serialize;

use crate::chunkmap::DivergenceBitmap;
use crate::consts::{METADATA_BYTES, METADATA_SECTORS, SECTOR_SIZE};
use crate::device::BlockDevice;
use crate::error::{CowError, CowResult, IoOp};

use super::layout::MetadataLayout;

pub struct MetadataStore {
    cow: Arc<dyn BlockDevice>,
    layout: MetadataLayout,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetadataReport {
    pub nr_chunks: u64,
    pub diverged: u64,
    pub padding_bits_set: u64,
    pub cow_sectors: u64,
    pub required_cow_sectors: u64,
}

impl MetadataReport {
    pub fn is_clean(&self) -> bool {
        self.padding_bits_set == 0 && self.cow_sectors >= self.required_cow_sectors
    }
}

impl MetadataStore {
    pub fn new(cow: Arc<dyn BlockDevice>, layout: MetadataLayout) -> Self {
        Self { cow, layout }
    }

    pub fn layout(&self) -> &MetadataLayout {
        &self.layout
    }

    /// Read the persisted bitmap.
    pub fn load(&self) -> CowResult<DivergenceBitmap> {
        let sectors = self.layout.sectors_needed;
        if sectors > METADATA_SECTORS {
            error!(
                "metadata too large to load (needs {} sectors, max {})",
                sectors, METADATA_SECTORS
            );
            return Err(CowError::Config(format!(
                "bitmap needs {} sectors, reserved region has {}",
                sectors, METADATA_SECTORS
            )));
        }

        let mut buf = vec![0u8; sectors as usize * SECTOR_SIZE];
        self.cow.read(0, &mut buf).map_err(|e| {
            error!("failed to load metadata from CoW device: {}", e);
            CowError::io(IoOp::MetadataLoad, e)
        })?;

        let bm = DivergenceBitmap::from_le_bytes(self.layout.nr_chunks, &buf);
        debug!(
            "loaded bitmap: {} sectors, {} of {} chunks diverged",
            sectors,
            bm.count_diverged(),
            self.layout.nr_chunks
        );
        Ok(bm)
    }

    /// Durably write the single metadata sector covering `chunk`, taken from `bitmap`.
    pub fn persist_sector(&self, bitmap: &DivergenceBitmap, chunk: u64) -> CowResult<()> {
        let sector = MetadataLayout::sector_of(chunk);
        if sector >= METADATA_SECTORS || sector >= bitmap.sectors() {
            error!(
                "metadata sector index {} out of bounds (max {})",
                sector,
                bitmap.sectors().min(METADATA_SECTORS)
            );
            return Err(CowError::OutOfBounds {
                sector,
                chunk,
                nr_chunks: self.layout.nr_chunks,
            });
        }

        let bytes = bitmap.sector_le_bytes(sector);
        self.cow
            .write(sector, &bytes, true)
            .map_err(|e| CowError::io(IoOp::MetadataPersist, e))
    }

    /// Zero the whole reserved region, durably.
    pub fn format(&self) -> CowResult<()> {
        let zeros = vec![0u8; METADATA_BYTES];
        self.cow
            .write(0, &zeros, true)
            .map_err(|e| CowError::io(IoOp::MetadataPersist, e))?;
        debug!("formatted {} metadata sectors", METADATA_SECTORS);
        Ok(())
    }

    pub fn check(&self, bitmap: &DivergenceBitmap) -> MetadataReport {
        MetadataReport {
            nr_chunks: self.layout.nr_chunks,
            diverged: bitmap.count_diverged(),
            padding_bits_set: bitmap.padding_bits_set(),
            cow_sectors: self.cow.len_sectors(),
            required_cow_sectors: self.layout.required_cow_sectors(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{FaultKind, MemDevice};

    fn store_on(dev: &Arc<MemDevice>, origin_sectors: u64) -> MetadataStore {
        let layout = MetadataLayout::for_origin(origin_sectors).unwrap();
        MetadataStore::new(Arc::clone(dev) as Arc<dyn BlockDevice>, layout)
    }

    #[test]
    fn persist_writes_exactly_the_covering_sector() {
        // 4096 * 3 chunks -> 3 metadata sectors in use
        let origin = 4096 * 3 * 8;
        // only the reserved region matters here
        let dev = Arc::new(MemDevice::new(8));
        let store = store_on(&dev, origin);

        let bm = store.load().unwrap().with_bit(4096 + 7, true);
        store.persist_sector(&bm, 4096 + 7).unwrap();

        assert_eq!(dev.write_log(), vec![(1, 1, true)]);
        let reloaded = store.load().unwrap();
        assert!(reloaded.test(4096 + 7));
        assert_eq!(reloaded.count_diverged(), 1);
    }

    #[test]
    fn failed_persist_leaves_disk_unchanged() {
        let dev = Arc::new(MemDevice::new(8 + 64));
        let store = store_on(&dev, 64);
        dev.inject_fault(FaultKind::DurableWrite, 0, 8, None);

        let bm = store.load().unwrap().with_bit(3, true);
        let err = store.persist_sector(&bm, 3).unwrap_err();
        assert!(matches!(
            err,
            CowError::Io {
                op: IoOp::MetadataPersist,
                ..
            }
        ));

        dev.clear_faults();
        assert!(!store.load().unwrap().test(3));
    }

    #[test]
    fn load_failure_is_reported() {
        let dev = Arc::new(MemDevice::new(8 + 64));
        let store = store_on(&dev, 64);
        dev.inject_fault(FaultKind::Read, 0, 1, None);
        assert!(matches!(
            store.load(),
            Err(CowError::Io {
                op: IoOp::MetadataLoad,
                ..
            })
        ));
    }

    #[test]
    fn format_clears_stale_bits_and_check_flags_padding() {
        let dev = Arc::new(MemDevice::new(8 + 64));
        let store = store_on(&dev, 64);

        let mut garbage = vec![0u8; SECTOR_SIZE];
        garbage[0] = 0xFF;
        garbage[1] = 0x01; // chunk 8: beyond nr_chunks
        dev.poke(0, &garbage);

        let report = store.check(&store.load().unwrap());
        assert_eq!(report.diverged, 8);
        assert_eq!(report.padding_bits_set, 1);
        assert!(!report.is_clean());

        store.format().unwrap();
        let report = store.check(&store.load().unwrap());
        assert_eq!(report.diverged, 0);
        assert!(report.is_clean());
    }
}
