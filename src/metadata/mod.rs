//! metadata — the persisted half of the divergence bitmap.
//!
//! - layout.rs — geometry: chunk count, bitmap size, reserved region, data-area offsets.
//! - store.rs  — MetadataStore: load / persist_sector / format / check.
//!
//! `format_cow` and `inspect_cow` work on an unattached CoW device (tooling).

use std::sync::Arc;

use log::info;

use crate::chunkmap::DivergenceBitmap;
use crate::device::BlockDevice;
use crate::error::{CowError, CowResult};

pub mod layout;
pub mod store;

pub use layout::MetadataLayout;
pub use store::{MetadataReport, MetadataStore};

/// Prepare a fresh CoW device for an origin of `origin_sectors`.
pub fn format_cow(origin_sectors: u64, cow: Arc<dyn BlockDevice>) -> CowResult<MetadataLayout> {
    let layout = MetadataLayout::for_origin(origin_sectors)?;
    let have = cow.len_sectors();
    if have < layout.required_cow_sectors() {
        return Err(CowError::Config(format!(
            "CoW device too small: {} sectors, need {}",
            have,
            layout.required_cow_sectors()
        )));
    }
    MetadataStore::new(cow, layout).format()?;
    info!(
        "formatted CoW device: {} chunks, bitmap {} sectors, data area at sector {}",
        layout.nr_chunks,
        layout.sectors_needed,
        layout.data_sector(0)
    );
    Ok(layout)
}

/// Load and validate the persisted bitmap without attaching.
pub fn inspect_cow(
    origin_sectors: u64,
    cow: Arc<dyn BlockDevice>,
) -> CowResult<(MetadataLayout, DivergenceBitmap, MetadataReport)> {
    let layout = MetadataLayout::for_origin(origin_sectors)?;
    let store = MetadataStore::new(cow, layout);
    let bitmap = store.load()?;
    let report = store.check(&bitmap);
    Ok((layout, bitmap, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;

    #[test]
    fn format_refuses_short_cow_device() {
        let cow: Arc<dyn BlockDevice> = Arc::new(MemDevice::new(8 + 8 * 7));
        assert!(matches!(format_cow(64, cow), Err(CowError::Config(_))));
    }

    #[test]
    fn inspect_after_format_is_clean() {
        let cow: Arc<dyn BlockDevice> = Arc::new(MemDevice::new(8 + 64));
        let layout = format_cow(64, Arc::clone(&cow)).unwrap();
        let (l, bm, report) = inspect_cow(64, cow).unwrap();
        assert_eq!(l, layout);
        assert_eq!(bm.count_diverged(), 0);
        assert!(report.is_clean());
    }
}
