//! Memory-mapped offset index.
//!
//! The index maps a segment-relative record offset to the byte position of
//! that record in the matching store file. Entries are a fixed 12 bytes --
//! a 4-byte big-endian relative offset followed by an 8-byte big-endian
//! store position -- so entry `k` lives at byte `12 * k` and a lookup is
//! plain arithmetic on a shared mapping.
//!
//! The file is grown to the configured maximum before mapping, because a
//! mapping's size is fixed at creation; pre-sizing avoids remapping on every
//! write. [`Index::close`] truncates the file back to the bytes actually in
//! use, so a cleanly closed index is exactly `entries * 12` bytes on disk.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::MmapMut;

use crate::error::{Error, Result};

/// Width in bytes of the relative-offset half of an entry.
const OFF_WIDTH: u64 = 4;
/// Width in bytes of the store-position half of an entry.
const POS_WIDTH: u64 = 8;
/// Total width in bytes of one index entry.
pub(crate) const ENTRY_WIDTH: u64 = OFF_WIDTH + POS_WIDTH;

/// A single decoded index row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    /// Offset of the record relative to the segment's base offset.
    pub(crate) relative_offset: u32,
    /// Byte position of the record's length prefix in the store file.
    pub(crate) position: u64,
}

/// Memory-mapped index file.
///
/// `size` tracks the logical number of bytes in use; the mapping itself is
/// always `max_index_bytes` long while the index is open.
#[derive(Debug)]
pub(crate) struct Index {
    file: File,
    mmap: MmapMut,
    size: u64,
}

impl Index {
    /// Open (or create) the index backed by the file at `path`, pre-sizing
    /// the file and its mapping to `max_index_bytes`.
    ///
    /// The logical size starts at the file's current length, which after a
    /// clean close is the exact number of bytes in use. A torn tail entry
    /// (length not a multiple of 12) is discarded with a warning.
    pub(crate) fn open(path: &Path, max_index_bytes: u64) -> Result<Index> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let mut size = file.metadata()?.len();
        if size > max_index_bytes {
            tracing::warn!(
                path = %path.display(),
                size,
                max_index_bytes,
                "index is larger than the configured maximum, clamping"
            );
            size = max_index_bytes;
        }
        if size % ENTRY_WIDTH != 0 {
            tracing::warn!(
                path = %path.display(),
                size,
                "index has a torn tail entry, discarding it"
            );
            size -= size % ENTRY_WIDTH;
        }

        file.set_len(max_index_bytes)?;
        // SAFETY: the file is open read/write for the lifetime of the mapping
        // and all accesses stay within its bounds. The log directory belongs
        // exclusively to this process.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Index { file, mmap, size })
    }

    /// Decode entry `n` (zero-based). Fails with `Eof` when entry `n` has not
    /// been written.
    pub(crate) fn read(&self, n: u32) -> Result<IndexEntry> {
        let byte_pos = u64::from(n) * ENTRY_WIDTH;
        if self.size < byte_pos + ENTRY_WIDTH {
            return Err(Error::Eof);
        }
        let at = byte_pos as usize;
        let off = &self.mmap[at..at + OFF_WIDTH as usize];
        let pos = &self.mmap[at + OFF_WIDTH as usize..at + ENTRY_WIDTH as usize];
        Ok(IndexEntry {
            relative_offset: u32::from_be_bytes(off.try_into().expect("4-byte slice")),
            position: u64::from_be_bytes(pos.try_into().expect("8-byte slice")),
        })
    }

    /// Decode the last entry, or fail with `Eof` if the index is empty.
    pub(crate) fn last(&self) -> Result<IndexEntry> {
        if self.size == 0 {
            return Err(Error::Eof);
        }
        self.read((self.size / ENTRY_WIDTH - 1) as u32)
    }

    /// Append an entry. Fails with `Eof` when the pre-allocated mapping has
    /// no room for another entry.
    pub(crate) fn write(&mut self, relative_offset: u32, position: u64) -> Result<()> {
        if (self.mmap.len() as u64) < self.size + ENTRY_WIDTH {
            return Err(Error::Eof);
        }
        let at = self.size as usize;
        self.mmap[at..at + OFF_WIDTH as usize].copy_from_slice(&relative_offset.to_be_bytes());
        self.mmap[at + OFF_WIDTH as usize..at + ENTRY_WIDTH as usize]
            .copy_from_slice(&position.to_be_bytes());
        self.size += ENTRY_WIDTH;
        Ok(())
    }

    /// Logical size in bytes: entries actually written, not the mapping size.
    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    /// Discard the last entry. Used on open to drop entries that reference
    /// positions past the end of the store after an unclean shutdown.
    pub(crate) fn drop_last(&mut self) {
        self.size = self.size.saturating_sub(ENTRY_WIDTH);
    }

    /// Sync the mapping to the file, sync the file to stable storage, and
    /// truncate the file back to its logical size.
    pub(crate) fn close(self) -> Result<()> {
        let Index { file, mmap, size } = self;
        mmap.flush()?;
        file.sync_all()?;
        // The mapping must be gone before the file shrinks beneath it.
        drop(mmap);
        file.set_len(size)?;
        Ok(())
    }
}
