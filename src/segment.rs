//! A single log segment: one store file and one index file sharing a base offset.
//!
//! The segment owns the translation between absolute offsets and the
//! segment-relative offsets stored in the index. Both files are named after
//! the base offset rendered as a decimal string (`<base>.store`,
//! `<base>.index`), so the base is recoverable purely from the filename.

use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::{ENTRY_WIDTH, Index};
use crate::store::Store;

/// One {store, index} pair covering the absolute offsets
/// `base_offset..next_offset`.
#[derive(Debug)]
pub(crate) struct Segment {
    store: Store,
    index: Index,
    store_path: PathBuf,
    index_path: PathBuf,
    base_offset: u64,
    next_offset: u64,
    config: Config,
}

impl Segment {
    /// Open (or create) the segment with the given base offset inside `dir`.
    ///
    /// `next_offset` is recovered from the last index entry. After an unclean
    /// shutdown the index tail can reference positions at or past the end of
    /// the store; such entries are dropped before the segment is used.
    pub(crate) fn open(dir: &Path, base_offset: u64, config: Config) -> Result<Segment> {
        let store_path = dir.join(format!("{base_offset}.store"));
        let index_path = dir.join(format!("{base_offset}.index"));
        let store = Store::open(&store_path)?;
        let mut index = Index::open(&index_path, config.segment.max_index_bytes)?;

        let store_size = store.size();
        let mut dropped = 0u64;
        while let Ok(entry) = index.last() {
            if entry.position < store_size {
                break;
            }
            index.drop_last();
            dropped += 1;
        }
        if dropped > 0 {
            tracing::warn!(
                base_offset,
                dropped,
                "dropped index entries referencing positions past the store end"
            );
        }

        let next_offset = match index.last() {
            Ok(entry) => base_offset + u64::from(entry.relative_offset) + 1,
            Err(Error::Eof) => base_offset,
            Err(e) => return Err(e),
        };

        Ok(Segment {
            store,
            index,
            store_path,
            index_path,
            base_offset,
            next_offset,
            config,
        })
    }

    /// Append a record, returning the absolute offset it was assigned.
    ///
    /// The store write and the index write are a unit: `next_offset` only
    /// advances once both have succeeded, so a failed append leaves the
    /// segment's offset accounting untouched.
    pub(crate) fn append(&mut self, record: &[u8]) -> Result<u64> {
        let cur = self.next_offset;
        let (_, position) = self.store.append(record)?;
        self.index.write((cur - self.base_offset) as u32, position)?;
        self.next_offset += 1;
        Ok(cur)
    }

    /// Read the record stored at the given absolute offset.
    pub(crate) fn read(&self, offset: u64) -> Result<Bytes> {
        if offset < self.base_offset || offset >= self.next_offset {
            return Err(Error::OffsetOutOfRange { offset });
        }
        let relative = (offset - self.base_offset) as u32;
        let entry = self.index.read(relative).map_err(|e| match e {
            Error::Eof => Error::OffsetOutOfRange { offset },
            other => other,
        })?;
        self.store.read(entry.position)
    }

    /// True when either file has no room for another record: the store has
    /// reached its byte budget, or the index cannot fit one more entry.
    pub(crate) fn is_maxed(&self) -> bool {
        self.store.size() >= self.config.segment.max_store_bytes
            || self.index.size() + ENTRY_WIDTH > self.config.segment.max_index_bytes
    }

    /// First absolute offset covered by this segment.
    pub(crate) fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// Absolute offset the next append to this segment would receive.
    pub(crate) fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// The underlying store, for raw byte-range reads by the whole-log reader.
    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    /// Close the index, then the store.
    pub(crate) fn close(self) -> Result<()> {
        self.index.close()?;
        self.store.close()?;
        Ok(())
    }

    /// Delete the segment's files from disk, then release the handles.
    ///
    /// The files are unlinked before anything else is torn down, so on
    /// failure the segment is handed back to the caller still fully usable:
    /// its handles and mapping are untouched and every offset it covers
    /// remains readable.
    pub(crate) fn remove(self) -> std::result::Result<(), (Segment, Error)> {
        if let Err(e) = std::fs::remove_file(&self.index_path) {
            return Err((self, e.into()));
        }
        if let Err(e) = std::fs::remove_file(&self.store_path) {
            return Err((self, e.into()));
        }
        // Both files are already unlinked; a close failure here concerns
        // data that was deliberately discarded.
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "error closing removed segment");
        }
        Ok(())
    }
}
