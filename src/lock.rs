//! Advisory locking of device files.
//!
//! Cross-platform (fs2) advisory locks taken on the device path itself:
//! - Shared: origin device; any number of targets may stack on one origin.
//! - Exclusive: CoW device; exactly one attached target may own its bitmap.
//!
//! Locks are released on Drop.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
pub struct DeviceLock {
    file: std::fs::File,
    path: PathBuf,
    mode: LockMode,
}

impl DeviceLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for DeviceLock {
    fn drop(&mut self) {
        // Unlock errors on drop are ignored; closing the handle drops the lock anyway.
        let _ = self.file.unlock();
    }
}

fn open_for_lock(path: &Path) -> Result<std::fs::File> {
    OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("open device for locking {}", path.display()))
}

/// Try to lock `path` in the requested mode. Returns Err if a conflicting lock is held.
pub fn try_lock_device(path: &Path, mode: LockMode) -> Result<DeviceLock> {
    let file = open_for_lock(path)?;
    match mode {
        LockMode::Shared => file
            .try_lock_shared()
            .with_context(|| format!("try_lock_shared failed: {}", path.display()))?,
        LockMode::Exclusive => file
            .try_lock_exclusive()
            .with_context(|| format!("try_lock_exclusive failed: {}", path.display()))?,
    }
    Ok(DeviceLock {
        file,
        path: path.to_path_buf(),
        mode,
    })
}

/// Lock `path`, blocking until the lock is granted.
pub fn lock_device(path: &Path, mode: LockMode) -> Result<DeviceLock> {
    let file = open_for_lock(path)?;
    match mode {
        LockMode::Shared => file
            .lock_shared()
            .with_context(|| format!("lock_shared {}", path.display()))?,
        LockMode::Exclusive => file
            .lock_exclusive()
            .with_context(|| format!("lock_exclusive {}", path.display()))?,
    }
    Ok(DeviceLock {
        file,
        path: path.to_path_buf(),
        mode,
    })
}
