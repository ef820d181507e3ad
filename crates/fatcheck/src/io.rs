//! Byte-level device access with a pending-write change log.
//!
//! Every repair the engine performs is first recorded here rather than
//! applied to the device directly. [`ChangeLog::write`] merges a new
//! write into whatever is already pending so the log stays sorted and
//! non-overlapping (spec invariant: "for any two records, their byte
//! ranges are disjoint and appear in ascending offset order"), and
//! [`Device::read`] patches freshly-read bytes with anything pending so
//! that later reads observe earlier, uncommitted writes.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// A single buffered write not yet committed to the device.
#[derive(Debug, Clone)]
struct PendingWrite {
    offset: u64,
    data: Vec<u8>,
}

impl PendingWrite {
    fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// Sorted, non-overlapping sequence of pending writes.
#[derive(Debug, Default)]
pub struct ChangeLog {
    writes: Vec<PendingWrite>,
}

impl ChangeLog {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Merge `bytes` at `offset` into the log, coalescing with any
    /// pending writes it overlaps or touches.
    pub fn write(&mut self, offset: u64, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let new_end = offset + bytes.len() as u64;

        // Find the span of existing records that touch [offset, new_end].
        let first = self.writes.partition_point(|w| w.end() < offset);
        let mut last = first;
        while last < self.writes.len() && self.writes[last].offset <= new_end {
            last += 1;
        }

        let merged_start = self.writes[first..last]
            .first()
            .map(|w| w.offset.min(offset))
            .unwrap_or(offset);
        let merged_end = self.writes[first..last]
            .last()
            .map(|w| w.end().max(new_end))
            .unwrap_or(new_end);

        let mut merged = vec![0u8; (merged_end - merged_start) as usize];
        for existing in &self.writes[first..last] {
            let rel = (existing.offset - merged_start) as usize;
            merged[rel..rel + existing.data.len()].copy_from_slice(&existing.data);
        }
        let rel = (offset - merged_start) as usize;
        merged[rel..rel + bytes.len()].copy_from_slice(bytes);

        self.writes.splice(
            first..last,
            std::iter::once(PendingWrite {
                offset: merged_start,
                data: merged,
            }),
        );
    }

    /// Patch `buf` (freshly read from `offset`) with any pending bytes
    /// it overlaps.
    fn patch(&self, offset: u64, buf: &mut [u8]) {
        let end = offset + buf.len() as u64;
        for w in &self.writes {
            if w.end() <= offset || w.offset >= end {
                continue;
            }
            let overlap_start = w.offset.max(offset);
            let overlap_end = w.end().min(end);
            let src_start = (overlap_start - w.offset) as usize;
            let dst_start = (overlap_start - offset) as usize;
            let len = (overlap_end - overlap_start) as usize;
            buf[dst_start..dst_start + len]
                .copy_from_slice(&w.data[src_start..src_start + len]);
        }
    }

    fn clear(&mut self) {
        self.writes.clear();
    }

    fn iter(&self) -> impl Iterator<Item = (u64, &[u8])> {
        self.writes.iter().map(|w| (w.offset, w.data.as_slice()))
    }
}

enum Backend {
    File(File),
    Memory(Vec<u8>),
}

impl Backend {
    fn len(&self) -> u64 {
        match self {
            Backend::File(f) => f.metadata().map(|m| m.len()).unwrap_or(0),
            Backend::Memory(v) => v.len() as u64,
        }
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        match self {
            Backend::File(f) => {
                f.seek(SeekFrom::Start(offset))?;
                f.read_exact(buf)
            }
            Backend::Memory(v) => {
                let start = offset as usize;
                let end = start + buf.len();
                if end > v.len() {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "read past end"));
                }
                buf.copy_from_slice(&v[start..end]);
                Ok(())
            }
        }
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        match self {
            Backend::File(f) => {
                f.seek(SeekFrom::Start(offset))?;
                f.write_all(data)
            }
            Backend::Memory(v) => {
                let start = offset as usize;
                let end = start + data.len();
                if end > v.len() {
                    v.resize(end, 0);
                }
                v[start..end].copy_from_slice(data);
                Ok(())
            }
        }
    }
}

/// A window mapped (or buffered, for in-memory devices) for fast random
/// reads, used by [`crate::fat::Fat32Cache`].
pub enum MappedWindow {
    #[cfg(feature = "std")]
    Mapped(memmap2::Mmap),
    Buffered(Vec<u8>),
}

impl MappedWindow {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            #[cfg(feature = "std")]
            MappedWindow::Mapped(m) => &m[..],
            MappedWindow::Buffered(v) => &v[..],
        }
    }
}

/// The device under check, plus its pending-change log.
///
/// `test` is the only read path that downgrades a device error to a
/// `false` return instead of propagating it, matching the read-test
/// contract used for bad-block probing.
pub struct Device {
    backend: Backend,
    log: ChangeLog,
    read_write: bool,
    write_through: bool,
}

impl Device {
    pub fn open(path: &Path, read_write: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(read_write)
            .open(path)?;
        Ok(Self {
            backend: Backend::File(file),
            log: ChangeLog::default(),
            read_write,
            write_through: false,
        })
    }

    pub fn from_memory(data: Vec<u8>) -> Self {
        Self {
            backend: Backend::Memory(data),
            log: ChangeLog::default(),
            read_write: true,
            write_through: false,
        }
    }

    pub fn read_write(&self) -> bool {
        self.read_write
    }

    /// `-w`: make every future [`Device::write`] commit straight through
    /// instead of batching into the change log.
    pub fn set_write_through(&mut self, on: bool) {
        self.write_through = on;
    }

    pub fn len(&self) -> u64 {
        self.backend.len()
    }

    /// Read `len` bytes at `pos`, patched with any pending writes.
    pub fn read(&mut self, pos: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.backend.read_at(pos, &mut buf)?;
        self.log.patch(pos, &mut buf);
        Ok(buf)
    }

    /// Read-only probe used for bad-block detection: a read error here
    /// is reported as `false`, never propagated.
    pub fn test(&mut self, pos: u64, len: usize) -> bool {
        self.read(pos, len).is_ok()
    }

    /// Buffer a write into the change log; not committed until
    /// [`Device::flush`], unless `-w` has switched this device to write
    /// straight through.
    pub fn write(&mut self, pos: u64, bytes: &[u8]) {
        if self.write_through {
            let _ = self.backend.write_at(pos, bytes);
        } else {
            self.log.write(pos, bytes);
        }
    }

    /// Write straight through to the device, bypassing the change log.
    /// Reserved for the dirty-flag clean step, which must be the last
    /// thing written.
    pub fn write_immed(&mut self, pos: u64, bytes: &[u8]) -> io::Result<()> {
        self.backend.write_at(pos, bytes)
    }

    /// Commit (or discard) pending writes. Returns whether the device
    /// was changed.
    pub fn flush(&mut self, commit: bool) -> io::Result<bool> {
        let changed = !self.log.is_empty();
        if commit {
            for (offset, data) in self.log.iter() {
                self.backend.write_at(offset, data)?;
            }
        }
        self.log.clear();
        Ok(changed)
    }

    pub fn changed(&self) -> bool {
        !self.log.is_empty()
    }

    /// Read back the whole device, patched with any pending writes.
    /// Used by callers that need to inspect what a run produced (the
    /// CLI's `-t`/`-w` paths never need this; it exists for tests that
    /// drive the engine against an in-memory image).
    pub fn snapshot(&mut self) -> io::Result<Vec<u8>> {
        let len = self.backend.len() as usize;
        self.read(0, len)
    }

    /// Map (or, for in-memory devices, buffer-copy) `len` bytes at
    /// `offset` for fast random access. Callers must still reconcile
    /// the result against the change log before trusting it.
    pub fn mmap_window(&self, offset: u64, len: usize) -> io::Result<MappedWindow> {
        match &self.backend {
            #[cfg(feature = "std")]
            Backend::File(f) => {
                let mmap = unsafe {
                    memmap2::MmapOptions::new()
                        .offset(offset)
                        .len(len)
                        .map(f)?
                };
                Ok(MappedWindow::Mapped(mmap))
            }
            #[cfg(not(feature = "std"))]
            Backend::File(_) => unreachable!("file backend requires the std feature"),
            Backend::Memory(v) => {
                let start = offset as usize;
                let end = (start + len).min(v.len());
                Ok(MappedWindow::Buffered(v[start..end].to_vec()))
            }
        }
    }

    /// Patch a buffer read independently of this device's own read path
    /// (used by the FAT32 mmap cache, which reads through its own
    /// mapping rather than [`Device::read`]).
    pub fn patch_from_log(&self, offset: u64, buf: &mut [u8]) {
        self.log.patch(offset, buf);
    }
}
