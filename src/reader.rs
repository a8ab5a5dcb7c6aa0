//! Windowed memory-mapped reader.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log;
use memmap2::{Mmap, MmapOptions};

use crate::page::{align_down_to_page, round_up_to_page};
use crate::record::extract_next;

/// Exposes a file of arbitrary size through a bounded, page-aligned mapped window.
///
/// Only one window is mapped at a time. Once the unconsumed part of the window holds no complete line the
/// window is moved forward: the new window starts at the page boundary preceding the first unconsumed byte,
/// so a line cut by the previous window end is fully visible in the next one. A line longer than the window
/// doubles the window until the line fits, the window shrinks back to its configured length once it moves
/// past that line.
///
/// The mapping and the file descriptor are released when the reader is dropped.
pub struct MappedReader {
    path: PathBuf,
    file: fs::File,
    file_len: u64,
    /// Configured window length, a multiple of the page size.
    base_window_size: usize,
    /// Current window length, enlarged while an over-long line is read.
    window_size: usize,
    window: Option<Mmap>,
    /// File offset of the window start, always page-aligned.
    window_offset: u64,
    /// Consumed bytes within the window.
    cursor: usize,
}

impl MappedReader {
    /// Opens a file for reading and maps its first window.
    ///
    /// # Arguments
    /// * `path` - File to be read
    /// * `window_size` - Window length in bytes, rounded up to the page size
    pub fn open(path: impl AsRef<Path>, window_size: usize) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = fs::File::open(&path)?;
        let file_len = file.metadata()?.len();
        let window_size = round_up_to_page(window_size.max(1) as u64) as usize;

        let mut reader = MappedReader {
            path,
            file,
            file_len,
            base_window_size: window_size,
            window_size,
            window: None,
            window_offset: 0,
            cursor: 0,
        };
        reader.map_window(0, 0)?;

        return Ok(reader);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn window_offset(&self) -> u64 {
        self.window_offset
    }

    /// Read cursor within [`MappedReader::current_window`].
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of bytes of the file consumed so far.
    pub fn consumed(&self) -> u64 {
        self.window_offset + self.cursor as u64
    }

    /// Returns the live mapped region. Bytes before [`MappedReader::cursor`] are already consumed.
    pub fn current_window(&self) -> &[u8] {
        match &self.window {
            Some(window) => &window[..],
            None => &[],
        }
    }

    /// Moves the read cursor forward within the current window.
    pub fn advance_past(&mut self, n_bytes: usize) {
        let window_len = self.current_window().len();
        self.cursor = (self.cursor + n_bytes).min(window_len);
    }

    fn window_end(&self) -> u64 {
        self.window_offset + self.current_window().len() as u64
    }

    /// Makes sure the window holds the next complete line, remapping it if needed.
    ///
    /// Returns `false` if the whole file has been consumed. At the end of the file an unterminated final
    /// line counts as complete.
    pub fn remap_if_exhausted(&mut self) -> io::Result<bool> {
        loop {
            let remaining = self.current_window().get(self.cursor..).unwrap_or_default();
            if remaining.contains(&b'\n') {
                return Ok(true);
            }

            let consumed = self.consumed();
            if consumed >= self.file_len {
                self.window = None;
                return Ok(false);
            }
            if self.window_end() >= self.file_len {
                return Ok(true);
            }

            let offset = align_down_to_page(consumed);
            if offset > self.window_offset {
                self.window_size = self.base_window_size;
            } else {
                self.window_size = self.window_size.saturating_mul(2);
                log::debug!(
                    "{}: line at offset {} exceeds the window, enlarging it to {} bytes",
                    self.path.display(),
                    consumed,
                    self.window_size
                );
            }
            self.map_window(offset, (consumed - offset) as usize)?;
        }
    }

    /// Returns the next line without its terminator, or [`None`] once the file is consumed.
    pub fn next_line(&mut self) -> io::Result<Option<&[u8]>> {
        if !self.remap_if_exhausted()? {
            return Ok(None);
        }

        let window: &[u8] = match &self.window {
            Some(window) => &window[..],
            None => return Ok(None),
        };

        match extract_next(window, self.cursor) {
            Some((line, next)) => {
                self.cursor = next;
                Ok(Some(line))
            }
            None => {
                let line = &window[self.cursor..];
                self.cursor = window.len();
                Ok(Some(line))
            }
        }
    }

    fn map_window(&mut self, offset: u64, cursor: usize) -> io::Result<()> {
        debug_assert_eq!(offset, align_down_to_page(offset));

        // release the previous window before mapping the next one
        self.window = None;
        self.window_offset = offset;
        self.cursor = cursor;

        if offset >= self.file_len {
            return Ok(());
        }

        let len = (self.file_len - offset).min(self.window_size as u64) as usize;
        // SAFETY: the mapping is private and read-only; inputs are not expected to be modified concurrently
        let window = unsafe { MmapOptions::new().offset(offset).len(len).map(&self.file)? };
        log::trace!("{}: mapped {} bytes at offset {}", self.path.display(), len, offset);

        self.window = Some(window);
        return Ok(());
    }
}
