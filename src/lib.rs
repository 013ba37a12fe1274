//! LogkeepDB: a durable, single-node commit log over segmented storage.
//!
//! The log is an append-only sequence of opaque byte records. Each record is
//! assigned a monotonically increasing 64-bit offset at the moment it is
//! appended, and readers retrieve records by offset.
//!
//! # Architecture
//!
//! On disk, the log is a directory of segments. Each segment is a pair of
//! files sharing a base offset: a *store* holding length-prefixed record
//! payloads, and a memory-mapped *index* mapping segment-relative offsets to
//! store positions. Exactly one segment -- the last -- accepts appends; when
//! it reaches its configured store or index budget, the log rolls over to a
//! new segment. Old segments can be dropped with `truncate`.
//!
//! A reader-writer lock on the segment list permits many concurrent readers
//! alongside a single appender. The gRPC tier narrows writes further through
//! a single appender task fed by a bounded channel.
//!
//! # Example
//!
//! ```ignore
//! use logkeep_db::{Config, Log};
//!
//! let log = Log::open("/var/lib/logkeep", Config::default())?;
//! let offset = log.append(b"hello world")?;
//! let record = log.read(offset)?;
//! assert_eq!(&record[..], b"hello world");
//! log.close()?;
//! ```

pub mod config;
pub mod error;
mod index;
pub mod log;
/// Prometheus metrics infrastructure for LogkeepDB.
pub mod metrics;
/// Generated protobuf types for the LogkeepDB gRPC API.
pub mod proto {
    tonic::include_proto!("logkeep");
}
mod segment;
pub mod service;
mod store;
pub mod writer;

pub use config::{Config, SegmentConfig};
pub use error::{Error, Result};
pub use log::{Log, LogReader};
pub use service::CommitLogService;
pub use writer::{AppendHandle, spawn_appender};
