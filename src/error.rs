//! Engine error types.
//!
//! Four classes, each with its own blast radius:
//! - `Config`            — fatal to attach, never retried.
//! - `ResourceExhausted` — request rejected immediately; caller may retry later.
//! - `Io`                — fatal to the single in-flight request; bitmap state untouched.
//! - `OutOfBounds`       — request rejected before any bitmap access or I/O.

use std::io;

use thiserror::Error;

use crate::request::Request;

/// Engine result type
pub type CowResult<T> = Result<T, CowError>;

/// Which I/O step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    OriginRead,
    CowWrite,
    CowRead,
    MetadataLoad,
    MetadataPersist,
}

impl std::fmt::Display for IoOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IoOp::OriginRead => "origin read",
            IoOp::CowWrite => "cow write",
            IoOp::CowRead => "cow read",
            IoOp::MetadataLoad => "metadata load",
            IoOp::MetadataPersist => "metadata persist",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum CowError {
    /// Bad parameters or unusable devices
    #[error("configuration error: {0}")]
    Config(String),

    /// Job pool is empty
    #[error("copy job pool exhausted (capacity {capacity})")]
    ResourceExhausted { capacity: usize },

    /// Device I/O failed
    #[error("I/O error during {op}: {source}")]
    Io {
        op: IoOp,
        #[source]
        source: io::Error,
    },

    /// Address beyond the origin length
    #[error("sector {sector} (chunk {chunk}) out of bounds: device has {nr_chunks} chunks")]
    OutOfBounds { sector: u64, chunk: u64, nr_chunks: u64 },
}

impl CowError {
    pub fn io(op: IoOp, source: io::Error) -> Self {
        CowError::Io { op, source }
    }

    /// Only pool exhaustion is worth retrying; everything else is final for the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CowError::ResourceExhausted { .. })
    }

    /// Kernel-style errno, for callers that speak block-layer status codes.
    pub fn errno(&self) -> i32 {
        match self {
            CowError::Config(_) => 22,               // EINVAL
            CowError::ResourceExhausted { .. } => 12, // ENOMEM
            CowError::Io { .. } => 5,                 // EIO
            CowError::OutOfBounds { .. } => 34,       // ERANGE
        }
    }
}

/// A rejected request, handed back to the submitter together with the reason.
#[derive(Debug, Error)]
#[error("request {} rejected: {error}", .request.id)]
pub struct MapError {
    pub error: CowError,
    pub request: Request,
}

impl MapError {
    pub fn new(error: CowError, request: Request) -> Self {
        Self { error, request }
    }

    pub fn into_parts(self) -> (CowError, Request) {
        (self.error, self.request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_only_for_pool_exhaustion() {
        assert!(CowError::ResourceExhausted { capacity: 1 }.is_retryable());
        assert!(!CowError::Config("x".into()).is_retryable());
        assert!(!CowError::io(IoOp::OriginRead, io::Error::other("boom")).is_retryable());
        assert!(!CowError::OutOfBounds {
            sector: 80,
            chunk: 10,
            nr_chunks: 8
        }
        .is_retryable());
    }

    #[test]
    fn io_error_message_names_the_step() {
        let e = CowError::io(IoOp::MetadataPersist, io::Error::other("disk gone"));
        let s = e.to_string();
        assert!(s.contains("metadata persist"), "{s}");
        assert!(s.contains("disk gone"), "{s}");
        assert_eq!(e.errno(), 5);
    }
}
