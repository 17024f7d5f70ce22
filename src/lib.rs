// Base modules
pub mod consts;
pub mod error;
pub mod config;
pub mod metrics;
pub mod lock;

// Subsystems (directories with mod.rs)
pub mod device;   // src/device/{mod,file,mem}.rs
pub mod request;  // src/request.rs
pub mod chunkmap; // src/chunkmap/{mod,bitmap}.rs
pub mod metadata; // src/metadata/{mod,layout,store}.rs
pub mod job;      // src/job/{mod,state,pool,executor,copy}.rs
pub mod target;   // src/target/{mod,volume}.rs

// Convenience re-exports
pub use chunkmap::{ChunkMap, DivergenceBitmap, Snapshot};
pub use config::CowConfig;
pub use device::{BlockDevice, FileDevice, MemDevice};
pub use error::{CowError, CowResult, IoOp, MapError};
pub use metadata::{format_cow, inspect_cow, MetadataLayout, MetadataReport, MetadataStore};
pub use request::{Completion, DeviceSubmitter, MapOutcome, ReqOp, Request, Submitter, Target};
pub use target::{CowTarget, CowVolume};
