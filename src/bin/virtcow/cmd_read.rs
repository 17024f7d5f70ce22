use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use virt_cow::CowTarget;

use super::cli::DevArgs;
use super::util::{config_for, hex_dump};

pub fn exec(dev: DevArgs, sector: u64, count: u64, out: Option<PathBuf>) -> Result<()> {
    let cfg = config_for(&dev)?;
    let vol = CowTarget::open_files(&cfg)?;
    let data = vol
        .read(sector, count)
        .with_context(|| format!("read {} sectors at {}", count, sector))?;

    match out {
        Some(out_path) => {
            let mut f = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&out_path)
                .with_context(|| format!("open {}", out_path.display()))?;
            f.write_all(&data)?;
            f.sync_all()?;
            println!("read {} B at sector {} -> {}", data.len(), sector, out_path.display());
        }
        None => {
            println!("read {} B at sector {}", data.len(), sector);
            println!("{}", hex_dump(&data));
        }
    }
    vol.detach();
    Ok(())
}
