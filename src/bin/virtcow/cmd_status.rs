use anyhow::{anyhow, Result};
use serde::Serialize;

use virt_cow::target::volume::open_pair;
use virt_cow::{inspect_cow, MetadataLayout, MetadataReport};

use super::cli::DevArgs;
use super::util::config_for;

#[derive(Serialize)]
struct StatusJson<'a> {
    origin: String,
    cow: String,
    layout: &'a MetadataLayout,
    report: &'a MetadataReport,
    diverged_chunks: Vec<u64>,
}

pub fn exec(dev: DevArgs, json: bool) -> Result<()> {
    let cfg = config_for(&dev)?;
    let (origin_path, cow_path) = match (cfg.origin.as_deref(), cfg.cow.as_deref()) {
        (Some(o), Some(c)) => (o, c),
        _ => return Err(anyhow!("device paths missing")),
    };
    let (origin, cow) = open_pair(origin_path, cow_path, cfg.lock_devices)?;
    let (layout, bitmap, report) = inspect_cow(origin.len_sectors(), cow)?;
    let diverged: Vec<u64> = bitmap.diverged().collect();

    if json {
        let out = StatusJson {
            origin: origin_path.display().to_string(),
            cow: cow_path.display().to_string(),
            layout: &layout,
            report: &report,
            diverged_chunks: diverged,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("origin:           {}", origin_path.display());
    println!("cow:              {}", cow_path.display());
    println!("origin sectors:   {}", layout.origin_sectors);
    println!("chunks:           {}", layout.nr_chunks);
    println!(
        "bitmap:           {} B in {} of {} sectors",
        layout.bitmap_bytes, layout.sectors_needed, layout.reserved_sectors
    );
    println!(
        "cow sectors:      {} (need {})",
        report.cow_sectors, report.required_cow_sectors
    );
    let pct = if layout.nr_chunks > 0 {
        report.diverged as f64 * 100.0 / layout.nr_chunks as f64
    } else {
        0.0
    };
    println!("diverged:         {} ({:.2}%)", report.diverged, pct);
    if !diverged.is_empty() {
        let shown: Vec<String> = diverged.iter().take(32).map(|c| c.to_string()).collect();
        let more = if diverged.len() > 32 { " ..." } else { "" };
        println!("diverged chunks:  {}{}", shown.join(" "), more);
    }
    if report.padding_bits_set > 0 {
        println!("WARNING: {} padding bits set (run `virtcow check`)", report.padding_bits_set);
    }
    Ok(())
}
