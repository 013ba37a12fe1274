//! The log: an ordered sequence of segments with a single active tail.
//!
//! The log owns the segment list and the concurrency discipline around it:
//! one reader-writer lock, taken exclusively by `append`, `truncate`, and the
//! teardown operations, and shared by `read`, the offset accessors, and
//! `reader`. The active segment is always the last in the list; when it fills
//! up, the log rolls over to a new segment whose base offset continues where
//! the previous one stopped.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard};

use bytes::Bytes;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::segment::Segment;

/// A durable, ordered sequence of opaque byte records addressed by dense
/// 64-bit offsets.
///
/// All methods take `&self`; interior locking permits many concurrent readers
/// alongside a single appender. The teardown methods (`close`, `remove`,
/// `reset`) consume the log, so use-after-close is a compile error.
#[derive(Debug)]
pub struct Log {
    dir: PathBuf,
    config: Config,
    segments: RwLock<Vec<Segment>>,
}

impl Log {
    /// Open the log stored in `dir`, creating the directory if needed.
    ///
    /// Existing segments are discovered by scanning the directory for
    /// `<base>.store` / `<base>.index` pairs, where `<base>` is the base
    /// offset as a strict decimal string. Files with non-numeric stems or
    /// unknown extensions are ignored, as is either half of a pair whose
    /// partner is missing. If no segment exists, a fresh one is created at
    /// `config.segment.initial_offset`.
    pub fn open(dir: impl AsRef<Path>, config: Config) -> Result<Log> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut store_bases = BTreeSet::new();
        let mut index_bases = BTreeSet::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let stem = path.file_stem().and_then(|s| s.to_str());
            let ext = path.extension().and_then(|s| s.to_str());
            let (Some(stem), Some(ext)) = (stem, ext) else {
                continue;
            };
            let Ok(base) = stem.parse::<u64>() else {
                tracing::warn!(path = %path.display(), "ignoring file with a non-numeric stem");
                continue;
            };
            match ext {
                "store" => {
                    store_bases.insert(base);
                }
                "index" => {
                    index_bases.insert(base);
                }
                _ => {
                    tracing::warn!(path = %path.display(), "ignoring file with an unknown extension");
                }
            }
        }
        for &base in store_bases.symmetric_difference(&index_bases) {
            tracing::warn!(
                base_offset = base,
                "ignoring segment file whose pair is missing"
            );
        }

        let mut segments = Vec::new();
        for &base in store_bases.intersection(&index_bases) {
            segments.push(Segment::open(&dir, base, config.clone())?);
        }
        if segments.is_empty() {
            segments.push(Segment::open(
                &dir,
                config.segment.initial_offset,
                config.clone(),
            )?);
        }

        Ok(Log {
            dir,
            config,
            segments: RwLock::new(segments),
        })
    }

    /// Append a record, returning the absolute offset it was assigned.
    ///
    /// The check for a maxed segment runs after every successful append: the
    /// new segment's base offset is `offset + 1`, so offsets stay monotonic
    /// even when the store overflows on the final byte. If creating the next
    /// segment fails, the record is stored anyway and the maxed segment stays
    /// active; the next append then fails at the index write stage, giving
    /// the caller the error.
    pub fn append(&self, record: &[u8]) -> Result<u64> {
        let mut segments = self.segments.write().expect("log lock poisoned");
        let active = segments
            .last_mut()
            .expect("log always has an active segment");
        let offset = active.append(record)?;
        if active.is_maxed() {
            match Segment::open(&self.dir, offset + 1, self.config.clone()) {
                Ok(segment) => segments.push(segment),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to roll over to a new segment");
                }
            }
        }
        Ok(offset)
    }

    /// Read the record stored at the given absolute offset.
    ///
    /// Fails with [`Error::OffsetOutOfRange`] when the offset is below the
    /// low-water mark or has not been assigned yet.
    pub fn read(&self, offset: u64) -> Result<Bytes> {
        let segments = self.segments.read().expect("log lock poisoned");
        let segment = segments
            .iter()
            .find(|s| s.base_offset() <= offset && offset < s.next_offset());
        match segment {
            Some(s) => s.read(offset),
            None => Err(Error::OffsetOutOfRange { offset }),
        }
    }

    /// Lowest absolute offset still stored in the log.
    pub fn lowest_offset(&self) -> u64 {
        let segments = self.segments.read().expect("log lock poisoned");
        segments
            .first()
            .expect("log always has at least one segment")
            .base_offset()
    }

    /// Highest absolute offset assigned so far, or 0 for an empty log whose
    /// first segment starts at offset 0.
    pub fn highest_offset(&self) -> u64 {
        let segments = self.segments.read().expect("log lock poisoned");
        let next = segments
            .last()
            .expect("log always has at least one segment")
            .next_offset();
        if next == 0 { 0 } else { next - 1 }
    }

    /// Remove every segment whose highest stored offset is at or below
    /// `lowest`, deleting their files.
    ///
    /// If that removes every segment, a fresh active segment is created at
    /// `lowest + 1` so the log remains usable.
    pub fn truncate(&self, lowest: u64) -> Result<()> {
        let mut segments = self.segments.write().expect("log lock poisoned");
        let mut retained = Vec::with_capacity(segments.len());
        let mut iter = std::mem::take(&mut *segments).into_iter();
        while let Some(segment) = iter.next() {
            if segment.next_offset() <= lowest + 1 {
                if let Err((segment, e)) = segment.remove() {
                    // The failed segment comes back intact; rewire it and
                    // everything after it so all offsets stay reachable.
                    retained.push(segment);
                    retained.extend(iter);
                    *segments = retained;
                    return Err(e);
                }
            } else {
                retained.push(segment);
            }
        }
        if retained.is_empty() {
            retained.push(Segment::open(&self.dir, lowest + 1, self.config.clone())?);
        }
        *segments = retained;
        Ok(())
    }

    /// A point-in-time byte stream concatenating every segment's store, in
    /// segment order, each read from position 0 to its current size.
    ///
    /// The reader borrows the log's shared lock for as long as it lives, so
    /// the snapshot is stable: appends and truncation wait until it is
    /// dropped, while other readers proceed. Used by higher layers for
    /// snapshotting and restores.
    pub fn reader(&self) -> LogReader<'_> {
        LogReader {
            segments: self.segments.read().expect("log lock poisoned"),
            current: 0,
            position: 0,
        }
    }

    /// Close every segment, flushing and syncing their files. Appends are
    /// durable once this has returned.
    pub fn close(self) -> Result<()> {
        let segments = self.segments.into_inner().expect("log lock poisoned");
        for segment in segments {
            segment.close()?;
        }
        Ok(())
    }

    /// Close the log and delete its directory tree.
    pub fn remove(self) -> Result<()> {
        let dir = self.dir.clone();
        self.close()?;
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    /// Remove the log, then reopen it fresh with the same configuration.
    ///
    /// The returned log has a single empty segment at the configured initial
    /// offset.
    pub fn reset(self) -> Result<Log> {
        let dir = self.dir.clone();
        let config = self.config.clone();
        self.remove()?;
        Log::open(dir, config)
    }
}

/// Byte stream over the whole log, yielded by [`Log::reader`].
///
/// Implements [`std::io::Read`]; the stream ends after the last segment's
/// store has been drained.
pub struct LogReader<'a> {
    segments: RwLockReadGuard<'a, Vec<Segment>>,
    current: usize,
    position: u64,
}

impl Read for LogReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current < self.segments.len() {
            let store = self.segments[self.current].store();
            let n = store
                .read_at(buf, self.position)
                .map_err(io::Error::other)?;
            if n > 0 {
                self.position += n as u64;
                return Ok(n);
            }
            self.current += 1;
            self.position = 0;
        }
        Ok(0)
    }
}
