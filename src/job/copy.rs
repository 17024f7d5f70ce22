//! job/copy — CopyJob: first-write materialization of one chunk.
//!
//! Per job, in order:
//! 1) COPYING:      unlocked re-check (already diverged -> COMPLETING), then read
//!                  the chunk from origin and durably write it to its CoW slot
//! 2) UPDATING_MAP: take the commit lock, re-test the bit
//! 3) PERSISTING:   stage the bit, write its metadata sector durably, publish
//! 4) COMPLETING:   rewrite the request to the CoW slot and resubmit it
//!
//! Any failure ends in ERROR: the request is failed, the bitmap is untouched
//! (a staged bit is discarded), and a later write to the chunk starts over.
//! Concurrent jobs for one chunk may all copy; only the first to reach the
//! commit lock persists and publishes.

use std::sync::Arc;

use log::{debug, error, trace};

use crate::consts::{CHUNK_SECTORS, SECTOR_SIZE};
use crate::device::offset_in_chunk;
use crate::error::{CowError, IoOp};
use crate::metrics::{
    record_commit_persisted, record_copy_failure, record_copy_performed, record_persist_failure,
    record_race_lost,
};
use crate::request::{Request, Target};

use super::executor::Job;
use super::pool::JobSlot;
use super::state::JobState;
use super::JobContext;

/// What a finished job did, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobReport {
    pub chunk: u64,
    pub request_id: u64,
    pub state: JobState,
    /// Chunk data was copied to the CoW slot.
    pub copied: bool,
    /// This job persisted and published the bit.
    pub committed: bool,
    /// Raw OS error (or -EIO) when `state == Error`.
    pub errno: Option<i32>,
}

pub struct CopyJob {
    ctx: Arc<JobContext>,
    chunk: u64,
    request: Option<Request>,
    state: JobState,
    slot: JobSlot,
    copied: bool,
    committed: bool,
    errno: Option<i32>,
}

impl CopyJob {
    pub fn new(ctx: Arc<JobContext>, chunk: u64, request: Request, slot: JobSlot) -> Self {
        Self {
            ctx,
            chunk,
            request: Some(request),
            state: JobState::Initialized,
            slot,
            copied: false,
            committed: false,
            errno: None,
        }
    }

    /// Give back the owned request without running (executor refused the job).
    pub fn into_request(mut self) -> Option<Request> {
        self.request.take()
    }

    fn advance(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal job transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!("chunk {}: {:?} -> {:?}", self.chunk, self.state, next);
        self.state = next;
    }

    /// Drive the job to a terminal state. The request is always resubmitted or failed.
    pub fn execute(mut self) -> JobReport {
        let request_id = self.request.as_ref().map(|r| r.id).unwrap_or(0);

        self.advance(JobState::Copying);
        if self.ctx.map.guard().test(self.chunk) {
            record_race_lost();
            debug!("chunk {}: diverged before copy, remapping only", self.chunk);
            self.advance(JobState::Completing);
            self.complete();
            return self.report(request_id);
        }
        if let Err(e) = self.copy_chunk() {
            record_copy_failure();
            error!("chunk {}: copy failed: {}", self.chunk, e);
            self.finish_error(e);
            return self.report(request_id);
        }
        self.copied = true;
        record_copy_performed();

        self.advance(JobState::UpdatingMap);
        let ctx = Arc::clone(&self.ctx);
        let guard = ctx.map.lock();
        match guard.stage(self.chunk) {
            None => {
                // Another job for this chunk committed first; its copy is authoritative.
                drop(guard);
                record_race_lost();
                debug!("chunk {}: already diverged, skipping persist", self.chunk);
            }
            Some(staged) => {
                self.advance(JobState::Persisting);
                match ctx.store.persist_sector(staged.bitmap(), self.chunk) {
                    Ok(()) => {
                        guard.publish(staged);
                        drop(guard);
                        self.committed = true;
                        record_commit_persisted();
                    }
                    Err(e) => {
                        guard.rollback(staged);
                        drop(guard);
                        record_persist_failure();
                        error!("chunk {}: metadata persist failed: {}", self.chunk, e);
                        self.finish_error(e);
                        return self.report(request_id);
                    }
                }
            }
        }

        self.advance(JobState::Completing);
        self.complete();
        self.report(request_id)
    }

    fn copy_chunk(&mut self) -> Result<(), CowError> {
        let layout = self.ctx.layout;
        let present = layout.origin_sectors_in_chunk(self.chunk) as usize * SECTOR_SIZE;
        let src = self.chunk * CHUNK_SECTORS;
        let dst = layout.data_sector(self.chunk);

        let buf = self.slot.buf_mut();
        // The tail past the origin end of a short last chunk is written as zeros.
        buf[present..].fill(0);
        self.ctx
            .origin
            .read(src, &mut buf[..present])
            .map_err(|e| CowError::io(IoOp::OriginRead, e))?;
        self.ctx
            .cow
            .write(dst, self.slot.buf(), true)
            .map_err(|e| CowError::io(IoOp::CowWrite, e))?;
        trace!(
            "chunk {}: copied origin {} -> cow {} ({} bytes)",
            self.chunk,
            src,
            dst,
            present
        );
        Ok(())
    }

    fn complete(&mut self) {
        let Some(mut req) = self.request.take() else {
            return;
        };
        let target = self.ctx.layout.data_sector(self.chunk) + offset_in_chunk(req.sector);
        req.remap(Target::Cow, target);
        self.ctx.submitter.resubmit(req);
    }

    fn finish_error(&mut self, e: CowError) {
        self.advance(JobState::Error);
        self.errno = Some(e.errno());
        if let Some(req) = self.request.take() {
            self.ctx.submitter.fail(req, e);
        }
    }

    fn report(&self, request_id: u64) -> JobReport {
        JobReport {
            chunk: self.chunk,
            request_id,
            state: self.state,
            copied: self.copied,
            committed: self.committed,
            errno: self.errno,
        }
    }
}

impl Job for CopyJob {
    fn run(self) {
        let report = self.execute();
        debug_assert!(report.state.is_terminal());
        debug!(
            "copy job done: chunk={} req={} state={:?} committed={}",
            report.chunk, report.request_id, report.state, report.committed
        );
    }
}
