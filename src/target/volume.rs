//! target/volume — CowVolume: synchronous driver around a CowTarget.
//!
//! Splits arbitrary sector ranges into chunk-confined requests, routes each one,
//! executes remapped requests inline and waits for job completions on the
//! DeviceSubmitter channel. Pool exhaustion is retried with a short backoff.
//! Used by the CLI and by end-to-end tests; safe to share across threads.

use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::config::CowConfig;
use crate::consts::SECTOR_SIZE;
use crate::device::{chunk_extents, chunk_of, BlockDevice, FileDevice};
use crate::error::{CowError, CowResult};
use crate::metrics::record_bounds_reject;
use crate::request::{Completion, DeviceSubmitter, MapOutcome, Request, Submitter};

use super::CowTarget;

const EXHAUSTED_RETRIES: u32 = 1000;
const EXHAUSTED_BACKOFF: Duration = Duration::from_millis(1);

struct Pending {
    rx: Receiver<Completion>,
    parked: HashMap<u64, Completion>,
}

pub struct CowVolume {
    target: CowTarget,
    submitter: Arc<DeviceSubmitter>,
    pending: Mutex<Pending>,
}

impl CowVolume {
    pub fn attach(
        origin: Arc<dyn BlockDevice>,
        cow: Arc<dyn BlockDevice>,
        cfg: &CowConfig,
    ) -> CowResult<Self> {
        let (submitter, rx) = DeviceSubmitter::new(Arc::clone(&origin), Arc::clone(&cow));
        let sink: Arc<dyn Submitter> = Arc::clone(&submitter) as Arc<dyn Submitter>;
        let target = CowTarget::attach(origin, cow, sink, cfg)?;
        Ok(Self {
            target,
            submitter,
            pending: Mutex::new(Pending {
                rx,
                parked: HashMap::new(),
            }),
        })
    }

    /// Open `cfg.origin` read-only and `cfg.cow` read-write, then attach.
    pub fn open_files(cfg: &CowConfig) -> Result<Self> {
        let origin_path = cfg
            .origin
            .as_deref()
            .ok_or_else(|| anyhow!("origin device path not configured (VIRTCOW_ORIGIN)"))?;
        let cow_path = cfg
            .cow
            .as_deref()
            .ok_or_else(|| anyhow!("CoW device path not configured (VIRTCOW_COW)"))?;

        debug!("opening volume: {}", cfg);
        let (origin, cow) = open_pair(origin_path, cow_path, cfg.lock_devices)?;
        Self::attach(origin, cow, cfg).with_context(|| {
            format!(
                "attach origin {} / cow {}",
                origin_path.display(),
                cow_path.display()
            )
        })
    }

    pub fn target(&self) -> &CowTarget {
        &self.target
    }

    /// Read `count` sectors of the virtual device.
    pub fn read(&self, sector: u64, count: u64) -> CowResult<Vec<u8>> {
        self.check_bounds(sector, count)?;
        let mut out = Vec::with_capacity(count as usize * SECTOR_SIZE);
        for (s, n) in chunk_extents(sector, count) {
            let done = self.submit(Request::read(s, n))?;
            out.extend_from_slice(&done.data);
        }
        Ok(out)
    }

    /// Write whole sectors to the virtual device.
    pub fn write(&self, sector: u64, data: &[u8]) -> CowResult<()> {
        if data.len() % SECTOR_SIZE != 0 {
            return Err(CowError::Config(format!(
                "write of {} bytes is not sector aligned",
                data.len()
            )));
        }
        let count = (data.len() / SECTOR_SIZE) as u64;
        self.check_bounds(sector, count)?;
        let mut off = 0usize;
        for (s, n) in chunk_extents(sector, count) {
            let len = n as usize * SECTOR_SIZE;
            self.submit(Request::write(s, data[off..off + len].to_vec()))?;
            off += len;
        }
        Ok(())
    }

    /// Whole-range check ahead of splitting; the router still checks each extent.
    fn check_bounds(&self, sector: u64, count: u64) -> CowResult<()> {
        let layout = self.target.geometry();
        match sector.checked_add(count) {
            Some(end) if end <= layout.origin_sectors => Ok(()),
            _ => {
                record_bounds_reject();
                Err(CowError::OutOfBounds {
                    sector,
                    chunk: chunk_of(sector),
                    nr_chunks: layout.nr_chunks,
                })
            }
        }
    }

    /// Route and finish one chunk-confined request, returning it completed.
    pub fn submit(&self, mut req: Request) -> CowResult<Request> {
        let mut attempts = 0u32;
        loop {
            let id = req.id;
            match self.target.classify(req) {
                Ok(MapOutcome::Remapped(mut routed)) => {
                    self.submitter.execute(&mut routed)?;
                    return Ok(routed);
                }
                Ok(MapOutcome::Submitted) => return self.wait(id),
                Err(rejected) => {
                    let (err, back) = rejected.into_parts();
                    if !err.is_retryable() || attempts >= EXHAUSTED_RETRIES {
                        return Err(err);
                    }
                    attempts += 1;
                    if attempts == 1 {
                        debug!("request {} deferred: {}", back.id, err);
                    }
                    req = back;
                    thread::sleep(EXHAUSTED_BACKOFF);
                }
            }
        }
    }

    fn wait(&self, id: u64) -> CowResult<Request> {
        let mut p = self.pending.lock();
        let done = loop {
            if let Some(c) = p.parked.remove(&id) {
                break c;
            }
            match p.rx.recv() {
                Ok(c) if c.request.id == id => break c,
                Ok(c) => {
                    p.parked.insert(c.request.id, c);
                }
                Err(_) => return Err(CowError::Config("completion channel closed".into())),
            }
        };
        done.result.map(|()| done.request)
    }

    /// Wait for outstanding jobs, then stop the target.
    pub fn detach(self) {
        self.target.flush();
        let parked = self.pending.lock().parked.len();
        if parked > 0 {
            warn!("detaching with {} unclaimed completions", parked);
        }
        self.target.detach();
    }
}

/// Open an origin/CoW file pair, with advisory locks when asked.
pub fn open_pair(
    origin: &Path,
    cow: &Path,
    lock: bool,
) -> Result<(Arc<dyn BlockDevice>, Arc<dyn BlockDevice>)> {
    let origin_dev = if lock {
        FileDevice::open_locked(origin, false)
    } else {
        FileDevice::open_ro(origin)
    }
    .with_context(|| format!("open origin {}", origin.display()))?;
    let cow_dev = if lock {
        FileDevice::open_locked(cow, true)
    } else {
        FileDevice::open_rw(cow)
    }
    .with_context(|| format!("open cow {}", cow.display()))?;
    let origin_dev: Arc<dyn BlockDevice> = Arc::new(origin_dev);
    let cow_dev: Arc<dyn BlockDevice> = Arc::new(cow_dev);
    Ok((origin_dev, cow_dev))
}
