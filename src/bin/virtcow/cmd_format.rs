use anyhow::{anyhow, Context, Result};
use std::sync::Arc;

use virt_cow::device::{BlockDevice, FileDevice};
use virt_cow::lock::{lock_device, LockMode};
use virt_cow::{format_cow, MetadataLayout};

use super::cli::DevArgs;
use super::util::config_for;

pub fn exec(dev: DevArgs, create: bool) -> Result<()> {
    let cfg = config_for(&dev)?;
    let (origin_path, cow_path) = match (cfg.origin.as_deref(), cfg.cow.as_deref()) {
        (Some(o), Some(c)) => (o, c),
        _ => return Err(anyhow!("device paths missing")),
    };

    let origin = FileDevice::open_ro(origin_path)?;
    let layout = MetadataLayout::for_origin(origin.len_sectors())
        .with_context(|| format!("origin {}", origin_path.display()))?;

    if create {
        FileDevice::create_image(cow_path, layout.required_cow_sectors())?;
    }

    // Wait for any attached user of the CoW device to go away before zeroing it.
    let _guard = if cfg.lock_devices {
        Some(lock_device(cow_path, LockMode::Exclusive)?)
    } else {
        None
    };
    let cow: Arc<dyn BlockDevice> = Arc::new(FileDevice::open_rw(cow_path)?);

    let layout = format_cow(origin.len_sectors(), cow)
        .with_context(|| format!("format {}", cow_path.display()))?;

    println!("Formatted CoW device {}", cow_path.display());
    println!("  origin sectors   = {}", layout.origin_sectors);
    println!("  chunks           = {}", layout.nr_chunks);
    println!("  bitmap sectors   = {} of {}", layout.sectors_needed, layout.reserved_sectors);
    println!("  data area start  = sector {}", layout.data_sector(0));
    println!("  required sectors = {}", layout.required_cow_sectors());
    Ok(())
}
