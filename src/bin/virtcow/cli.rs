use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use super::util::parse_byte;

/// Copy-on-write block virtualization over an origin/CoW device pair
#[derive(Parser, Debug)]
#[command(name = "virtcow", version, about = "virt-cow CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

/// Device pair. Falls back to VIRTCOW_ORIGIN / VIRTCOW_COW when omitted.
#[derive(Args, Debug, Clone)]
pub struct DevArgs {
    /// Origin device or image (never written)
    #[arg(long)]
    pub origin: Option<PathBuf>,
    /// CoW device or image (metadata region + data area)
    #[arg(long)]
    pub cow: Option<PathBuf>,
    /// Skip advisory locks on the device files
    #[arg(long, default_value_t = false)]
    pub no_lock: bool,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Size-check the CoW device and zero its metadata region
    Format {
        #[command(flatten)]
        dev: DevArgs,
        /// Create (or grow) the CoW image file to the required size first
        #[arg(long, default_value_t = false)]
        create: bool,
    },
    /// Geometry and diverged chunks. --json prints one JSON object.
    Status {
        #[command(flatten)]
        dev: DevArgs,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Validate geometry and bitmap padding (exit code 1 on problems)
    Check {
        #[command(flatten)]
        dev: DevArgs,
    },
    /// Read sectors of the virtual device
    Read {
        #[command(flatten)]
        dev: DevArgs,
        #[arg(long)]
        sector: u64,
        #[arg(long, default_value_t = 1)]
        count: u64,
        /// Write raw bytes to a file instead of dumping hex
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write sectors of the virtual device (triggers copy-on-write)
    Write {
        #[command(flatten)]
        dev: DevArgs,
        #[arg(long)]
        sector: u64,
        #[arg(long, default_value_t = 1)]
        count: u64,
        /// Fill byte, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_byte, default_value = "0")]
        fill: u8,
        /// Take data from a file (zero-padded to whole sectors); overrides --fill/--count
        #[arg(long)]
        input: Option<PathBuf>,
    },
}
