//! target — CowTarget: one attached origin/CoW pair and its request router.
//!
//! attach():   geometry -> size checks -> job pool + executor -> bitmap load.
//! classify(): bounds check, then one lock-free snapshot test per request:
//!   diverged          -> remap to the CoW slot (sync)
//!   clear, read       -> remap to origin unchanged (sync)
//!   clear, write      -> hand to a CopyJob (async, completion via Submitter)
//! detach():   drain every in-flight job, then release shared state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, trace, warn};

use crate::chunkmap::{ChunkMap, Snapshot};
use crate::config::CowConfig;
use crate::consts::{CHUNK_SECTORS, SECTOR_SIZE};
use crate::device::{chunk_of, offset_in_chunk, BlockDevice};
use crate::error::{CowError, CowResult, MapError};
use crate::job::{CopyJob, JobContext, JobExecutor, JobPool};
use crate::metadata::{MetadataLayout, MetadataStore};
use crate::metrics::{
    record_bounds_reject, record_job_scheduled, record_pool_exhausted, record_read_cow,
    record_read_origin, record_write_cow_direct,
};
use crate::request::{MapOutcome, ReqOp, Request, Submitter, Target};

pub mod volume;

pub use volume::CowVolume;

pub struct CowTarget {
    ctx: Arc<JobContext>,
    pool: JobPool,
    executor: JobExecutor<CopyJob>,
    detached: AtomicBool,
}

impl CowTarget {
    /// Bind an origin and a CoW device. On error nothing is left running.
    pub fn attach(
        origin: Arc<dyn BlockDevice>,
        cow: Arc<dyn BlockDevice>,
        submitter: Arc<dyn Submitter>,
        cfg: &CowConfig,
    ) -> CowResult<Self> {
        cfg.validate()?;

        let layout = MetadataLayout::for_origin(origin.len_sectors())?;
        let cow_sectors = cow.len_sectors();
        if cow_sectors < layout.required_cow_sectors() {
            return Err(CowError::Config(format!(
                "CoW device too small: {} sectors, need {} ({} reserved + {} chunks)",
                cow_sectors,
                layout.required_cow_sectors(),
                layout.reserved_sectors,
                layout.nr_chunks
            )));
        }

        let pool = JobPool::new(cfg.job_pool_capacity);
        // Dropping the executor on any later `?` joins its workers.
        let executor = JobExecutor::start(cfg.workers, "virtcow")?;

        let store = MetadataStore::new(Arc::clone(&cow), layout);
        let bitmap = store.load()?;
        let diverged = bitmap.count_diverged();

        let ctx = Arc::new(JobContext {
            origin,
            cow,
            map: ChunkMap::new(bitmap),
            store,
            layout,
            submitter,
        });

        info!(
            "attached: origin {} sectors, {} chunks, bitmap {} sectors, {} diverged, {} workers, pool {}",
            layout.origin_sectors,
            layout.nr_chunks,
            layout.sectors_needed,
            diverged,
            cfg.workers,
            cfg.job_pool_capacity
        );

        Ok(Self {
            ctx,
            pool,
            executor,
            detached: AtomicBool::new(false),
        })
    }

    /// Open both devices from `cfg` (origin read-only, CoW read-write) and attach
    /// them behind a synchronous driver.
    pub fn open_files(cfg: &CowConfig) -> anyhow::Result<CowVolume> {
        CowVolume::open_files(cfg)
    }

    /// Route one chunk-confined request. Never blocks.
    pub fn classify(&self, mut req: Request) -> Result<MapOutcome, MapError> {
        if req.target != Target::Virtual {
            return Err(MapError::new(
                CowError::Config(format!("request {} is already routed", req.id)),
                req,
            ));
        }
        if req.data.len() % SECTOR_SIZE != 0 {
            return Err(MapError::new(
                CowError::Config(format!(
                    "request {} carries {} bytes, not whole sectors",
                    req.id,
                    req.data.len()
                )),
                req,
            ));
        }
        let count = req.sectors();
        if count == 0 || offset_in_chunk(req.sector) + count > CHUNK_SECTORS {
            return Err(MapError::new(
                CowError::Config(format!(
                    "request {} ({} sectors at {}) is not confined to one chunk",
                    req.id, count, req.sector
                )),
                req,
            ));
        }

        let layout = &self.ctx.layout;
        let chunk = chunk_of(req.sector);
        if chunk >= layout.nr_chunks || req.sector + count > layout.origin_sectors {
            record_bounds_reject();
            warn!(
                "request {} out of bounds: sector {} count {} (origin {} sectors)",
                req.id, req.sector, count, layout.origin_sectors
            );
            return Err(MapError::new(
                CowError::OutOfBounds {
                    sector: req.sector,
                    chunk,
                    nr_chunks: layout.nr_chunks,
                },
                req,
            ));
        }

        let diverged = self.ctx.map.guard().test(chunk);
        if diverged {
            let target = layout.data_sector(chunk) + offset_in_chunk(req.sector);
            trace!("req {} chunk {} diverged -> cow {}", req.id, chunk, target);
            match req.op {
                ReqOp::Read => record_read_cow(),
                ReqOp::Write => record_write_cow_direct(),
            }
            req.remap(Target::Cow, target);
            return Ok(MapOutcome::Remapped(req));
        }

        if !req.is_write() {
            trace!("req {} chunk {} clear -> origin {}", req.id, chunk, req.sector);
            record_read_origin();
            let sector = req.sector;
            req.remap(Target::Origin, sector);
            return Ok(MapOutcome::Remapped(req));
        }

        let Some(slot) = self.pool.acquire() else {
            record_pool_exhausted();
            warn!(
                "copy job pool exhausted (capacity {}); rejecting write to chunk {}",
                self.pool.capacity(),
                chunk
            );
            return Err(MapError::new(
                CowError::ResourceExhausted {
                    capacity: self.pool.capacity(),
                },
                req,
            ));
        };

        trace!("req {} chunk {} first write -> copy job", req.id, chunk);
        let job = CopyJob::new(Arc::clone(&self.ctx), chunk, req, slot);
        match self.executor.schedule(job) {
            Ok(()) => {
                record_job_scheduled();
                Ok(MapOutcome::Submitted)
            }
            Err(job) => {
                let err = CowError::Config("target is detached".into());
                match job.into_request() {
                    Some(req) => Err(MapError::new(err, req)),
                    // CopyJob::new always holds a request until it runs.
                    None => Ok(MapOutcome::Submitted),
                }
            }
        }
    }

    /// Current bitmap snapshot; stays valid while held.
    pub fn snapshot(&self) -> Snapshot {
        self.ctx.map.snapshot()
    }

    pub fn is_diverged(&self, chunk: u64) -> bool {
        self.ctx.map.guard().test(chunk)
    }

    pub fn diverged_count(&self) -> u64 {
        self.ctx.map.guard().count_diverged()
    }

    pub fn geometry(&self) -> MetadataLayout {
        self.ctx.layout
    }

    /// Snapshots published since attach.
    pub fn generation(&self) -> u64 {
        self.ctx.map.generation()
    }

    pub fn in_flight_jobs(&self) -> usize {
        self.executor.in_flight()
    }

    pub fn pool_available(&self) -> usize {
        self.pool.available()
    }

    /// Wait until every copy job scheduled so far has finished.
    pub fn flush(&self) {
        self.executor.flush();
    }

    /// Drain in-flight jobs and stop the workers.
    pub fn detach(self) {
        self.teardown();
    }

    fn teardown(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        self.executor.shutdown();
        info!(
            "detached: {} of {} chunks diverged, {} snapshots published",
            self.diverged_count(),
            self.ctx.layout.nr_chunks,
            self.generation()
        );
    }
}

impl Drop for CowTarget {
    fn drop(&mut self) {
        self.teardown();
    }
}
