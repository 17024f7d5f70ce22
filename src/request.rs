//! request — inbound block requests, routing targets and the resubmission seam.
//!
//! A `Request` is confined to one chunk. The router rewrites `target`/`sector`
//! in place; once a request is handed to a copy job the job owns it until it is
//! resubmitted or failed through a `Submitter`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use log::{trace, warn};

use crate::consts::SECTOR_SIZE;
use crate::device::BlockDevice;
use crate::error::{CowError, CowResult, IoOp};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqOp {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Virtual device address space (not yet routed).
    Virtual,
    Origin,
    Cow,
}

#[derive(Debug)]
pub struct Request {
    pub id: u64,
    pub op: ReqOp,
    pub target: Target,
    /// Sector on `target`.
    pub sector: u64,
    /// Payload for writes; destination buffer for reads.
    pub data: Vec<u8>,
}

impl Request {
    pub fn read(sector: u64, count: u64) -> Self {
        Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            op: ReqOp::Read,
            target: Target::Virtual,
            sector,
            data: vec![0u8; count as usize * SECTOR_SIZE],
        }
    }

    pub fn write(sector: u64, data: Vec<u8>) -> Self {
        Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            op: ReqOp::Write,
            target: Target::Virtual,
            sector,
            data,
        }
    }

    pub fn is_write(&self) -> bool {
        self.op == ReqOp::Write
    }

    pub fn sectors(&self) -> u64 {
        (self.data.len() / SECTOR_SIZE) as u64
    }

    pub(crate) fn remap(&mut self, target: Target, sector: u64) {
        self.target = target;
        self.sector = sector;
    }
}

/// Result of routing one request.
#[derive(Debug)]
pub enum MapOutcome {
    /// Rewritten in place; the caller issues it to `request.target`.
    Remapped(Request),
    /// Ownership moved to a copy job; completion arrives through the `Submitter`.
    Submitted,
}

/// Resubmission path for requests that went through a copy job.
pub trait Submitter: Send + Sync {
    /// Hand a rewritten request to its target device's I/O path.
    fn resubmit(&self, request: Request);

    /// End a request with an error.
    fn fail(&self, request: Request, error: CowError);
}

/// Final status of a request executed by `DeviceSubmitter`.
#[derive(Debug)]
pub struct Completion {
    pub request: Request,
    pub result: CowResult<()>,
}

/// Executes requests synchronously against the two devices and reports each
/// completion on a channel.
pub struct DeviceSubmitter {
    origin: Arc<dyn BlockDevice>,
    cow: Arc<dyn BlockDevice>,
    tx: parking_lot::Mutex<Sender<Completion>>,
}

impl DeviceSubmitter {
    pub fn new(
        origin: Arc<dyn BlockDevice>,
        cow: Arc<dyn BlockDevice>,
    ) -> (Arc<Self>, Receiver<Completion>) {
        let (tx, rx) = mpsc::channel();
        (
            Arc::new(Self {
                origin,
                cow,
                tx: parking_lot::Mutex::new(tx),
            }),
            rx,
        )
    }

    /// Issue a routed request to its device. Used both for `resubmit` and for
    /// requests the router remapped synchronously.
    pub fn execute(&self, request: &mut Request) -> CowResult<()> {
        let (dev, op) = match (request.target, request.op) {
            (Target::Origin, ReqOp::Read) => (&self.origin, IoOp::OriginRead),
            (Target::Cow, ReqOp::Read) => (&self.cow, IoOp::CowRead),
            (Target::Cow, ReqOp::Write) => (&self.cow, IoOp::CowWrite),
            (Target::Origin, ReqOp::Write) => {
                return Err(CowError::Config(format!(
                    "request {} routed as a write to the origin device",
                    request.id
                )))
            }
            (Target::Virtual, _) => {
                return Err(CowError::Config(format!(
                    "request {} was never routed",
                    request.id
                )))
            }
        };
        trace!(
            "execute req={} {:?} {:?} sector={} sectors={}",
            request.id,
            request.op,
            request.target,
            request.sector,
            request.sectors()
        );
        match request.op {
            ReqOp::Read => dev
                .read(request.sector, &mut request.data)
                .map_err(|e| CowError::io(op, e)),
            ReqOp::Write => dev
                .write(request.sector, &request.data, false)
                .map_err(|e| CowError::io(op, e)),
        }
    }

    fn complete(&self, completion: Completion) {
        if self.tx.lock().send(completion).is_err() {
            warn!("completion receiver dropped; discarding completion");
        }
    }
}

impl Submitter for DeviceSubmitter {
    fn resubmit(&self, mut request: Request) {
        let result = self.execute(&mut request);
        self.complete(Completion { request, result });
    }

    fn fail(&self, request: Request, error: CowError) {
        self.complete(Completion {
            request,
            result: Err(error),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;

    #[test]
    fn request_ids_are_unique() {
        let a = Request::read(0, 1);
        let b = Request::write(0, vec![0u8; SECTOR_SIZE]);
        assert_ne!(a.id, b.id);
        assert_eq!(a.sectors(), 1);
        assert!(b.is_write());
        assert_eq!(a.target, Target::Virtual);
    }

    #[test]
    fn device_submitter_refuses_origin_writes() {
        let origin: Arc<dyn BlockDevice> = Arc::new(MemDevice::new(16));
        let cow: Arc<dyn BlockDevice> = Arc::new(MemDevice::new(32));
        let (sub, rx) = DeviceSubmitter::new(origin, cow);

        let mut req = Request::write(0, vec![1u8; SECTOR_SIZE]);
        req.remap(Target::Origin, 0);
        sub.resubmit(req);
        let c = rx.recv().unwrap();
        assert!(matches!(c.result, Err(CowError::Config(_))));
    }
}
