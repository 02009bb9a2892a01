//! Error types for bounded_queue.

use std::io;

use crate::transport::CompletionStatus;

/// Errors raised by ring setup, framing and the transport binding.
///
/// A full ring or a record that has not fully arrived is not an error; those
/// surface as `Ok(None)` / `Ok(false)` from the polling operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Mapping, sizing or advising the ring memory failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// The transport refused to register a memory range.
    #[error("memory registration failed: {0}")]
    Registration(String),
    /// Payload does not fit the separator's size field.
    #[error("payload too large: {size} bytes, max {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },
    /// Zero-length records cannot be framed.
    #[error("empty payload")]
    EmptyPayload,
    /// Invalid sender or receiver configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Malformed size token (e.g. `"16Q"`).
    #[error("invalid size: {0}")]
    InvalidSize(String),
    /// Handshake private data is shorter than the expected struct.
    #[error("handshake data too short: expected {expected} bytes, got {got}")]
    Handshake { expected: usize, got: usize },
    /// The local ring could not be allocated with the negotiated size.
    #[error("ring size mismatch: negotiated {requested} bytes, allocated {allocated} bytes")]
    RingSizeMismatch { requested: u64, allocated: u64 },
    /// The transport does not deliver writes in posting order, which the
    /// sentinel framing depends on.
    #[error("transport does not guarantee in-order delivery")]
    UnorderedTransport,
    /// A work request completed with an error status.
    #[error("work request {wr_id} completed with {status:?}")]
    Completion { wr_id: u64, status: CompletionStatus },
    /// The queue already failed; no further requests are accepted.
    #[error("queue is in error state")]
    QueueError,
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::Io(io::Error::from_raw_os_error(e as i32))
    }
}

/// Result type for bounded_queue operations.
pub type Result<T> = std::result::Result<T, Error>;
