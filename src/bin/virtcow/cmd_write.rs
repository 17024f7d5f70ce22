use anyhow::{Context, Result};
use std::path::PathBuf;

use virt_cow::consts::SECTOR_SIZE;
use virt_cow::device::sectors_for_bytes;
use virt_cow::{metrics, CowTarget};

use super::cli::DevArgs;
use super::util::config_for;

pub fn exec(
    dev: DevArgs,
    sector: u64,
    count: u64,
    fill: u8,
    input: Option<PathBuf>,
) -> Result<()> {
    let data = match input {
        Some(path) => {
            let mut buf = std::fs::read(&path)
                .with_context(|| format!("read input {}", path.display()))?;
            let sectors = sectors_for_bytes(buf.len() as u64);
            buf.resize(sectors as usize * SECTOR_SIZE, 0);
            buf
        }
        None => vec![fill; count as usize * SECTOR_SIZE],
    };

    let cfg = config_for(&dev)?;
    let vol = CowTarget::open_files(&cfg)?;
    let before = vol.target().diverged_count();
    vol.write(sector, &data)
        .with_context(|| format!("write {} B at sector {}", data.len(), sector))?;
    let after = vol.target().diverged_count();

    println!(
        "wrote {} sectors at {} ({} chunk(s) newly diverged, {} total)",
        data.len() / SECTOR_SIZE,
        sector,
        after - before,
        after
    );
    vol.detach();

    let m = metrics::snapshot();
    println!(
        "copies={} commits={} races_lost={} (ratio {:.2}) direct_cow_writes={} failures={}",
        m.copies_performed,
        m.commits_persisted,
        m.races_lost,
        m.race_ratio(),
        m.writes_cow_direct,
        m.copy_failures + m.persist_failures
    );
    Ok(())
}
