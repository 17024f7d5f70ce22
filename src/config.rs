//! Centralized configuration and builder for virt-cow.
//!
//! The on-disk format has no knobs (chunk size and reserved region are constants,
//! see `consts`). What lives here is process-level:
//! - device paths for the file-backed attach path (`CowTarget::open_files`)
//! - worker count of the job executor
//! - capacity of the bounded copy-job pool
//! - advisory locking of the device files
//!
//! `CowConfig::from_env()` reads:
//! - VIRTCOW_ORIGIN       — origin device/file path
//! - VIRTCOW_COW          — CoW device/file path
//! - VIRTCOW_WORKERS      — job worker threads (default 4)
//! - VIRTCOW_JOB_POOL     — copy job pool capacity (default 256)
//! - VIRTCOW_LOCK_DEVICES — 1|true|yes|on (default on)

use std::fmt;
use std::path::PathBuf;

use crate::consts::{DEFAULT_WORKERS, JOB_POOL_CAPACITY};
use crate::error::{CowError, CowResult};

#[derive(Clone, Debug)]
pub struct CowConfig {
    /// Origin device (read-only, never written).
    /// Env: VIRTCOW_ORIGIN
    pub origin: Option<PathBuf>,

    /// CoW device (metadata region + data area).
    /// Env: VIRTCOW_COW
    pub cow: Option<PathBuf>,

    /// Worker threads running copy jobs.
    /// Env: VIRTCOW_WORKERS (default 4)
    pub workers: usize,

    /// Upper bound of simultaneously outstanding copy jobs.
    /// Env: VIRTCOW_JOB_POOL (default 256)
    pub job_pool_capacity: usize,

    /// Shared lock on origin, exclusive lock on CoW (fs2 advisory locks).
    /// Env: VIRTCOW_LOCK_DEVICES (default true)
    pub lock_devices: bool,
}

impl Default for CowConfig {
    fn default() -> Self {
        Self {
            origin: None,
            cow: None,
            workers: DEFAULT_WORKERS,
            job_pool_capacity: JOB_POOL_CAPACITY,
            lock_devices: true,
        }
    }
}

fn env_flag(v: &str) -> bool {
    let s = v.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "yes" || s == "on"
}

impl CowConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("VIRTCOW_ORIGIN") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.origin = Some(PathBuf::from(s));
            }
        }

        if let Ok(v) = std::env::var("VIRTCOW_COW") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.cow = Some(PathBuf::from(s));
            }
        }

        if let Ok(v) = std::env::var("VIRTCOW_WORKERS") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.workers = n;
            }
        }

        if let Ok(v) = std::env::var("VIRTCOW_JOB_POOL") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.job_pool_capacity = n;
            }
        }

        if let Ok(v) = std::env::var("VIRTCOW_LOCK_DEVICES") {
            cfg.lock_devices = env_flag(&v);
        }

        cfg
    }

    pub fn with_origin<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.origin = Some(path.into());
        self
    }

    pub fn with_cow<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cow = Some(path.into());
        self
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn with_job_pool_capacity(mut self, n: usize) -> Self {
        self.job_pool_capacity = n;
        self
    }

    pub fn with_lock_devices(mut self, on: bool) -> Self {
        self.lock_devices = on;
        self
    }

    pub fn build(self) -> Self {
        self
    }

    /// Reject values that would leave the target unable to make progress.
    pub fn validate(&self) -> CowResult<()> {
        if self.workers == 0 {
            return Err(CowError::Config("workers must be > 0".into()));
        }
        if self.job_pool_capacity == 0 {
            return Err(CowError::Config("job_pool_capacity must be > 0".into()));
        }
        Ok(())
    }
}

impl fmt::Display for CowConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CowConfig {{ origin: {}, cow: {}, workers: {}, job_pool_capacity: {}, lock_devices: {} }}",
            self.origin
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "unset".to_string()),
            self.cow
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "unset".to_string()),
            self.workers,
            self.job_pool_capacity,
            self.lock_devices,
        )
    }
}
