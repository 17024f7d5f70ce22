//! job — deferred work for first writes.
//!
//! - state.rs    — JobState and its monotonic transitions.
//! - pool.rs     — JobPool: bounded slots with preallocated chunk buffers.
//! - executor.rs — JobExecutor: worker threads, schedule / flush / shutdown.
//! - copy.rs     — CopyJob: copy, commit, resubmit.

use std::sync::Arc;

use crate::chunkmap::ChunkMap;
use crate::device::BlockDevice;
use crate::metadata::{MetadataLayout, MetadataStore};
use crate::request::Submitter;

pub mod copy;
pub mod executor;
pub mod pool;
pub mod state;

pub use copy::{CopyJob, JobReport};
pub use executor::{Job, JobExecutor};
pub use pool::{JobPool, JobSlot};
pub use state::JobState;

/// Everything a copy job touches, shared by the target and all its jobs.
pub struct JobContext {
    pub origin: Arc<dyn BlockDevice>,
    pub cow: Arc<dyn BlockDevice>,
    pub map: ChunkMap,
    pub store: MetadataStore,
    pub layout: MetadataLayout,
    pub submitter: Arc<dyn Submitter>,
}
