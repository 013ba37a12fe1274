//! Error types for LogkeepDB.
//!
//! This module defines the unified error enum used throughout the crate. All fallible
//! operations return `Result<T, Error>`. Components never log-and-swallow: errors
//! propagate up to the caller, and the gRPC service layer is the first place they
//! are translated into a wire representation.

/// Unified error type for all LogkeepDB operations.
///
/// Each variant represents a distinct failure mode. The gRPC layer maps variants
/// to status codes:
///
/// - `OffsetOutOfRange` -> `NOT_FOUND`
/// - `Eof` -> `FAILED_PRECONDITION`
/// - `Io` -> `INTERNAL`
/// - `Corrupt` -> `DATA_LOSS`
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested offset is below the log's low-water mark or has not been
    /// assigned yet.
    #[error("offset out of range: {offset}")]
    OffsetOutOfRange {
        /// The absolute offset that was requested.
        offset: u64,
    },

    /// A store or index refused a write because its pre-allocated space is
    /// exhausted, or a read ran past the end of the data actually present.
    ///
    /// Inside the log this triggers segment roll-over; callers only see it in
    /// the degraded state where a maxed segment could not be rolled.
    #[error("end of file")]
    Eof,

    /// An I/O error occurred during a file or mapping operation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk state is structurally inconsistent. Reserved for recovery
    /// surfaces; ordinary operation never constructs it.
    #[error("corrupt state: {0}")]
    Corrupt(String),
}

/// Convenience alias used by every fallible operation in the crate.
pub type Result<T> = std::result::Result<T, Error>;
