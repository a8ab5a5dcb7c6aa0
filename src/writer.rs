//! Growable memory-mapped writer.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log;
use memmap2::{MmapMut, MmapOptions};

use crate::page::round_up_to_page;
use crate::record::Record;

/// Writes an output file through a shared writable mapping that grows on demand.
///
/// Appended bytes are accumulated in memory and copied into the mapping once the accumulator reaches the
/// flush threshold, so peak memory does not depend on the output size. The file is over-allocated while
/// writing and truncated to the exact number of written bytes by [`MappedWriter::finalize`].
pub struct MappedWriter {
    path: PathBuf,
    file: fs::File,
    map: Option<MmapMut>,
    mapped_len: usize,
    /// Bytes copied into the mapping.
    written: usize,
    pending: Vec<u8>,
    flush_threshold: usize,
}

impl MappedWriter {
    /// Creates (or truncates) the output file and maps the initial region.
    ///
    /// # Arguments
    /// * `path` - Output file path
    /// * `reservation` - Initial mapping length in bytes, rounded up to the page size
    /// * `flush_threshold` - Accumulator size that triggers a copy into the mapping
    pub fn create(path: impl AsRef<Path>, reservation: u64, flush_threshold: usize) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let flush_threshold = flush_threshold.max(1);
        let mut writer = MappedWriter {
            path,
            file,
            map: None,
            mapped_len: 0,
            written: 0,
            pending: Vec::with_capacity(flush_threshold.min(1 << 20)),
            flush_threshold,
        };
        writer.remap(round_up_to_page(reservation.max(1)) as usize)?;

        return Ok(writer);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Length of the current mapping.
    pub fn mapped_len(&self) -> usize {
        self.mapped_len
    }

    /// Number of bytes appended so far, including the ones not yet copied into the mapping.
    pub fn len(&self) -> u64 {
        (self.written + self.pending.len()) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends raw bytes.
    pub fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.pending.extend_from_slice(bytes);
        self.flush_if_full()
    }

    /// Appends the serialized output line of a record.
    pub fn append_record(&mut self, record: &Record) -> io::Result<()> {
        record.write_to(&mut self.pending);
        self.flush_if_full()
    }

    fn flush_if_full(&mut self) -> io::Result<()> {
        if self.pending.len() >= self.flush_threshold {
            self.copy_pending()?;
        }
        Ok(())
    }

    fn copy_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let end = self.written + self.pending.len();
        if end > self.mapped_len {
            self.grow(end - self.mapped_len)?;
        }

        let map = self
            .map
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "output mapping is not available"))?;
        map[self.written..end].copy_from_slice(&self.pending);

        self.written = end;
        self.pending.clear();
        Ok(())
    }

    /// Extends the file and the mapping by at least `extra_bytes`. Already written bytes are preserved.
    pub fn grow(&mut self, extra_bytes: usize) -> io::Result<()> {
        let wanted = self.mapped_len + extra_bytes;
        // grow geometrically to keep the number of remaps logarithmic
        let new_len = round_up_to_page(wanted.max(self.mapped_len.saturating_mul(2)) as u64) as usize;

        log::debug!(
            "{}: growing output mapping {} -> {} bytes",
            self.path.display(),
            self.mapped_len,
            new_len
        );
        self.remap(new_len)
    }

    fn remap(&mut self, len: usize) -> io::Result<()> {
        // the mapping is shared, dropping it keeps written pages in the file
        self.map = None;
        self.mapped_len = 0;

        self.file.set_len(len as u64)?;
        // SAFETY: the file is exclusively owned by this writer for its whole lifetime
        let map = unsafe { MmapOptions::new().len(len).map_mut(&self.file)? };

        self.map = Some(map);
        self.mapped_len = len;
        Ok(())
    }

    /// Copies pending bytes into the mapping and forces mapped pages to storage.
    pub fn flush(&mut self) -> io::Result<()> {
        self.copy_pending()?;
        if let Some(map) = &self.map {
            map.flush()?;
        }
        Ok(())
    }

    /// Flushes everything, unmaps the file and truncates it to the exact number of written bytes.
    /// Returns the final file size.
    pub fn finalize(mut self) -> io::Result<u64> {
        self.copy_pending()?;
        if let Some(map) = self.map.take() {
            map.flush()?;
        }
        self.mapped_len = 0;

        self.file.set_len(self.written as u64)?;
        self.file.sync_all()?;

        log::debug!("{}: finalized at {} bytes", self.path.display(), self.written);
        return Ok(self.written as u64);
    }
}
