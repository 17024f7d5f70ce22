//! device/file — FileDevice: positional sector I/O on a regular file or a block device node.
//!
//! Uses `FileExt::{read_exact_at, write_all_at}` so concurrent callers never share a
//! seek position. Durable writes are followed by `sync_data` before returning.

use anyhow::{anyhow, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use log::debug;

use super::{check_range, BlockDevice};
use crate::consts::SECTOR_SIZE;
use crate::lock::{try_lock_device, DeviceLock, LockMode};

#[derive(Debug)]
pub struct FileDevice {
    file: File,
    path: PathBuf,
    len_sectors: u64,
    writable: bool,
    _lock: Option<DeviceLock>,
}

impl FileDevice {
    /// Open read-only (origin).
    pub fn open_ro(path: &Path) -> Result<Self> {
        Self::open_inner(path, false, None)
    }

    /// Open read-write (CoW).
    pub fn open_rw(path: &Path) -> Result<Self> {
        Self::open_inner(path, true, None)
    }

    /// Open and hold an advisory lock for the device lifetime
    /// (shared for read-only, exclusive for read-write).
    pub fn open_locked(path: &Path, writable: bool) -> Result<Self> {
        let mode = if writable {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        };
        let lock = try_lock_device(path, mode)?;
        debug!("locked {} ({:?})", lock.path().display(), lock.mode());
        Self::open_inner(path, writable, Some(lock))
    }

    fn open_inner(path: &Path, writable: bool, lock: Option<DeviceLock>) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .with_context(|| format!("open device {}", path.display()))?;

        // metadata().len() is 0 for block device nodes; seeking to the end works for both.
        let len_bytes = file
            .seek(SeekFrom::End(0))
            .with_context(|| format!("size device {}", path.display()))?;
        if len_bytes % SECTOR_SIZE as u64 != 0 {
            return Err(anyhow!(
                "device {} length {} is not a multiple of {} bytes",
                path.display(),
                len_bytes,
                SECTOR_SIZE
            ));
        }
        let len_sectors = len_bytes / SECTOR_SIZE as u64;
        debug!(
            "opened {} ({} sectors, {})",
            path.display(),
            len_sectors,
            if writable { "rw" } else { "ro" }
        );

        Ok(Self {
            file,
            path: path.to_path_buf(),
            len_sectors,
            writable,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Create (or extend) a sparse image file of `len_sectors`. Never shrinks.
    pub fn create_image(path: &Path, len_sectors: u64) -> Result<()> {
        let f = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("create image {}", path.display()))?;
        let want = len_sectors * SECTOR_SIZE as u64;
        if f.metadata()?.len() < want {
            f.set_len(want)
                .with_context(|| format!("set_len {} on {}", want, path.display()))?;
        }
        f.sync_all()?;
        Ok(())
    }
}

impl BlockDevice for FileDevice {
    fn len_sectors(&self) -> u64 {
        self.len_sectors
    }

    fn read(&self, sector: u64, buf: &mut [u8]) -> io::Result<()> {
        check_range(self.len_sectors, sector, buf.len())?;
        self.file.read_exact_at(buf, sector * SECTOR_SIZE as u64)
    }

    fn write(&self, sector: u64, buf: &[u8], durable: bool) -> io::Result<()> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("device {} is read-only", self.path.display()),
            ));
        }
        check_range(self.len_sectors, sector, buf.len())?;
        self.file.write_all_at(buf, sector * SECTOR_SIZE as u64)?;
        if durable {
            self.file.sync_data()?;
        }
        Ok(())
    }
}
