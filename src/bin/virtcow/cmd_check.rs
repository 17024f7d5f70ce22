use anyhow::{anyhow, Result};

use virt_cow::inspect_cow;
use virt_cow::target::volume::open_pair;

use super::cli::DevArgs;
use super::util::config_for;

pub fn exec(dev: DevArgs) -> Result<()> {
    let cfg = config_for(&dev)?;
    let (origin_path, cow_path) = match (cfg.origin.as_deref(), cfg.cow.as_deref()) {
        (Some(o), Some(c)) => (o, c),
        _ => return Err(anyhow!("device paths missing")),
    };
    let (origin, cow) = open_pair(origin_path, cow_path, cfg.lock_devices)?;
    let (layout, _bitmap, report) = inspect_cow(origin.len_sectors(), cow)?;

    let mut problems = Vec::new();
    if report.cow_sectors < report.required_cow_sectors {
        problems.push(format!(
            "CoW device has {} sectors, {} chunks need {}",
            report.cow_sectors, layout.nr_chunks, report.required_cow_sectors
        ));
    }
    if report.padding_bits_set > 0 {
        problems.push(format!(
            "{} bits set beyond chunk {} (bitmap padding must be zero)",
            report.padding_bits_set,
            layout.nr_chunks.saturating_sub(1)
        ));
    }

    if problems.is_empty() {
        println!(
            "OK: {} chunks, {} diverged, bitmap {} sectors",
            layout.nr_chunks, report.diverged, layout.sectors_needed
        );
        return Ok(());
    }
    for p in &problems {
        println!("PROBLEM: {}", p);
    }
    Err(anyhow!("{} problem(s) found on {}", problems.len(), cow_path.display()))
}
