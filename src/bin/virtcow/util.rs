use anyhow::{anyhow, Result};

use virt_cow::CowConfig;

use super::cli::DevArgs;

/// Merge command-line device paths over the environment configuration.
pub fn config_for(dev: &DevArgs) -> Result<CowConfig> {
    let mut cfg = CowConfig::from_env();
    if let Some(p) = &dev.origin {
        cfg = cfg.with_origin(p);
    }
    if let Some(p) = &dev.cow {
        cfg = cfg.with_cow(p);
    }
    if dev.no_lock {
        cfg = cfg.with_lock_devices(false);
    }
    if cfg.origin.is_none() {
        return Err(anyhow!("--origin not given and VIRTCOW_ORIGIN not set"));
    }
    if cfg.cow.is_none() {
        return Err(anyhow!("--cow not given and VIRTCOW_COW not set"));
    }
    Ok(cfg.build())
}

pub fn parse_byte(s: &str) -> std::result::Result<u8, String> {
    let t = s.trim();
    let parsed = match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => t.parse::<u8>(),
    };
    parsed.map_err(|e| format!("invalid byte '{}': {}", s, e))
}

pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (i, line) in bytes.chunks(16).enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!("{:08x}:", i * 16));
        for b in line {
            out.push_str(&format!(" {:02x}", b));
        }
    }
    out
}
