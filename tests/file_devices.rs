// tests/file_devices.rs
//
// Run only this file:
//   cargo test --test file_devices -- --nocapture
//
// Covers:
// 1) Image files: format, open through CowTarget::open_files, write/read through
//    the engine, detach, reopen: data and divergence persist, origin file unchanged.
// 2) The CoW device is exclusively locked while attached.
// 3) Status-style inspection on an unattached pair.
// 4) Attach refuses a CoW image that is too small.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use virt_cow::consts::SECTOR_SIZE;
use virt_cow::target::volume::open_pair;
use virt_cow::{format_cow, inspect_cow, BlockDevice, CowConfig, CowTarget, FileDevice};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("virtcow-test-{prefix}-{pid}-{t}-{id}"))
}

fn origin_image(path: &Path, sectors: u64) -> Result<Vec<u8>> {
    let bytes: Vec<u8> = (0..sectors as usize * SECTOR_SIZE)
        .map(|i| (i / SECTOR_SIZE) as u8 ^ 0x3C)
        .collect();
    fs::write(path, &bytes)?;
    Ok(bytes)
}

fn formatted_pair(root: &Path, sectors: u64) -> Result<(PathBuf, PathBuf, Vec<u8>)> {
    fs::create_dir_all(root)?;
    let origin = root.join("origin.img");
    let cow = root.join("cow.img");
    let bytes = origin_image(&origin, sectors)?;
    FileDevice::create_image(&cow, 8 + sectors.div_ceil(8) * 8)?;
    let cow_dev: Arc<dyn BlockDevice> = Arc::new(FileDevice::open_rw(&cow)?);
    format_cow(sectors, cow_dev)?;
    Ok((origin, cow, bytes))
}

#[test]
fn file_backed_volume_persists_across_reopen() -> Result<()> {
    let root = unique_root("reopen");
    let (origin, cow, origin_bytes) = formatted_pair(&root, 64)?;
    let cfg = CowConfig::default()
        .with_origin(&origin)
        .with_cow(&cow)
        .with_workers(2)
        .build();

    {
        let vol = CowTarget::open_files(&cfg)?;
        assert_eq!(&vol.read(8, 8)?[..], &origin_bytes[8 * SECTOR_SIZE..16 * SECTOR_SIZE]);

        vol.write(10, &[0xEE; SECTOR_SIZE])?;
        let chunk = vol.read(8, 8)?;
        assert_eq!(&chunk[2 * SECTOR_SIZE..3 * SECTOR_SIZE], &[0xEE; SECTOR_SIZE][..]);
        assert_eq!(&chunk[..2 * SECTOR_SIZE], &origin_bytes[8 * SECTOR_SIZE..10 * SECTOR_SIZE]);
        assert!(vol.target().is_diverged(1));

        // Spans chunks 2 and 3: split into chunk-confined requests.
        vol.write(20, &vec![0x77; 10 * SECTOR_SIZE])?;
        assert_eq!(vol.target().diverged_count(), 3);

        // Exclusive lock on the CoW image while attached.
        assert!(CowTarget::open_files(&cfg).is_err());
        vol.detach();
    }

    let vol = CowTarget::open_files(&cfg)?;
    assert_eq!(vol.target().diverged_count(), 3);
    let all = vol.read(0, 64)?;
    let mut want = origin_bytes.clone();
    want[10 * SECTOR_SIZE..11 * SECTOR_SIZE].fill(0xEE);
    want[20 * SECTOR_SIZE..30 * SECTOR_SIZE].fill(0x77);
    assert_eq!(all, want);
    vol.detach();

    assert_eq!(fs::read(&origin)?, origin_bytes, "origin image never written");

    let (o, c) = open_pair(&origin, &cow, true)?;
    let (layout, bitmap, report) = inspect_cow(o.len_sectors(), c)?;
    assert_eq!(layout.nr_chunks, 8);
    assert_eq!(bitmap.diverged().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(report.is_clean());

    fs::remove_dir_all(&root)?;
    Ok(())
}

#[test]
fn reformat_discards_divergence() -> Result<()> {
    let root = unique_root("reformat");
    let (origin, cow, _) = formatted_pair(&root, 32)?;
    let cfg = CowConfig::default().with_origin(&origin).with_cow(&cow);

    let vol = CowTarget::open_files(&cfg)?;
    vol.write(0, &[1u8; SECTOR_SIZE])?;
    vol.detach();

    let cow_dev: Arc<dyn BlockDevice> = Arc::new(FileDevice::open_rw(&cow)?);
    format_cow(32, cow_dev)?;

    let vol = CowTarget::open_files(&cfg)?;
    assert_eq!(vol.target().diverged_count(), 0);
    vol.detach();

    fs::remove_dir_all(&root)?;
    Ok(())
}

#[test]
fn undersized_cow_image_is_rejected() -> Result<()> {
    let root = unique_root("small");
    fs::create_dir_all(&root)?;
    let origin = root.join("origin.img");
    let cow = root.join("cow.img");
    origin_image(&origin, 64)?;
    FileDevice::create_image(&cow, 8 + 32)?;

    let cfg = CowConfig::default().with_origin(&origin).with_cow(&cow);
    let err = match CowTarget::open_files(&cfg) {
        Err(e) => e,
        Ok(_) => panic!("attach must fail on a short CoW image"),
    };
    assert!(format!("{:#}", err).contains("too small"));

    // Locks were released with the failed attach.
    let vol_cfg = cfg.clone().with_lock_devices(true);
    FileDevice::create_image(&cow, 8 + 64)?;
    let vol = CowTarget::open_files(&vol_cfg)?;
    vol.detach();

    fs::remove_dir_all(&root)?;
    Ok(())
}

#[test]
fn missing_paths_are_configuration_errors() {
    let cfg = CowConfig::default();
    assert!(CowTarget::open_files(&cfg).is_err());
}
