//! Append-only store file.
//!
//! The store persists length-prefixed byte records to a single file and reads
//! them back by byte position. Writes accumulate in a user-space buffer so
//! that many small appends become one syscall per flush; every read path
//! flushes the buffer first so a just-appended record is always visible.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Mutex;

use bytes::Bytes;

use crate::error::{Error, Result};

/// Number of bytes in the big-endian length prefix written before each record.
pub(crate) const LEN_WIDTH: u64 = 8;

/// Capacity of the user-space write buffer.
const WRITE_BUF_CAPACITY: usize = 8 * 1024;

/// Append-only byte file wrapped by a write buffer.
///
/// All operations are serialized by a single internal mutex guarding the file
/// handle, the buffer, and the logical size counter, so the position returned
/// by [`Store::append`] is exactly the byte offset of that record's length
/// prefix.
#[derive(Debug)]
pub(crate) struct Store {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    file: File,
    buf: Vec<u8>,
    size: u64,
}

impl Store {
    /// Open (or create) the store backed by the file at `path`.
    ///
    /// The logical size starts at the file's current length, so a store can
    /// be re-created over existing data after a restart.
    pub(crate) fn open(path: &Path) -> Result<Store> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        let size = file.metadata()?.len();
        Ok(Store {
            inner: Mutex::new(Inner {
                file,
                buf: Vec::with_capacity(WRITE_BUF_CAPACITY),
                size,
            }),
        })
    }

    /// Append `record` preceded by its 8-byte big-endian length.
    ///
    /// Returns `(bytes_written, position)` where `position` is the byte
    /// offset of the length prefix and `bytes_written` is `8 + record.len()`.
    /// The segment uses `position` when it writes the matching index entry.
    pub(crate) fn append(&self, record: &[u8]) -> Result<(u64, u64)> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let position = inner.size;
        inner
            .buf
            .extend_from_slice(&(record.len() as u64).to_be_bytes());
        inner.buf.extend_from_slice(record);
        let written = LEN_WIDTH + record.len() as u64;
        inner.size += written;
        if inner.buf.len() >= WRITE_BUF_CAPACITY {
            inner.flush()?;
        }
        Ok((written, position))
    }

    /// Read the record whose length prefix begins at `position`.
    pub(crate) fn read(&self, position: u64) -> Result<Bytes> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.flush()?;
        if inner.size < position + LEN_WIDTH {
            return Err(Error::Eof);
        }
        let mut len_buf = [0u8; LEN_WIDTH as usize];
        inner.file.read_exact_at(&mut len_buf, position)?;
        let len = u64::from_be_bytes(len_buf);
        if inner.size < position + LEN_WIDTH + len {
            return Err(Error::Eof);
        }
        let mut record = vec![0u8; len as usize];
        inner.file.read_exact_at(&mut record, position + LEN_WIDTH)?;
        Ok(Bytes::from(record))
    }

    /// Fill `buf` with bytes starting at byte offset `offset`, returning the
    /// number of bytes read. Used by the whole-log reader for raw byte-range
    /// reads; returns 0 at end of file.
    pub(crate) fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.flush()?;
        Ok(inner.file.read_at(buf, offset)?)
    }

    /// Current logical size in bytes, including any buffered-but-unflushed tail.
    pub(crate) fn size(&self) -> u64 {
        self.inner.lock().expect("store mutex poisoned").size
    }

    /// Flush the write buffer, sync the file to stable storage, and drop the
    /// handle. Appends are only durable once this has completed.
    pub(crate) fn close(self) -> Result<()> {
        let mut inner = self.inner.into_inner().expect("store mutex poisoned");
        inner.flush()?;
        inner.file.sync_all()?;
        Ok(())
    }
}

impl Inner {
    fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.file.write_all(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }
}
