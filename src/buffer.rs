use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use crate::error::{Error, Result};

/// Editable text with a line model, the surface every scan and mutation works against.
///
/// Offsets are byte offsets into UTF-8 text and lines are 0-based. `\n`, `\r\n` and
/// `\r` all terminate a line; text ending in a terminator has a trailing empty line.
pub trait TextBuffer {
    fn text(&self) -> &str;

    fn len(&self) -> usize {
        self.text().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `length` bytes starting at `offset`.
    fn get(&self, offset: usize, length: usize) -> Result<&str> {
        let end = offset
            .checked_add(length)
            .ok_or(Error::BadLocation { offset })?;
        self.text()
            .get(offset..end)
            .ok_or(Error::BadLocation { offset: end })
    }

    /// Replace `length` bytes at `offset` with `text`.
    fn replace(&mut self, offset: usize, length: usize, text: &str) -> Result<()>;

    fn line_count(&self) -> usize;

    fn line_of_offset(&self, offset: usize) -> Result<usize>;

    fn line_offset(&self, line: usize) -> Result<usize>;

    /// Length of `line` including its terminator.
    fn line_length(&self, line: usize) -> Result<usize>;

    /// Length of the terminator of `line`; 0 for the last line.
    fn line_delimiter_length(&self, line: usize) -> Result<usize>;

    /// Forward substring search starting at `from`.
    fn find(&self, from: usize, needle: &str) -> Option<usize> {
        self.text()
            .get(from..)?
            .find(needle)
            .map(|pos| pos + from)
    }

    /// Fails when the buffer can no longer vouch for its offsets.
    fn check_sync(&self) -> Result<()> {
        Ok(())
    }

    /// Write the buffer back to stable storage.
    fn save(&mut self) -> Result<()>;
}

/// A buffer held entirely in memory. `save` only counts calls.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryBuffer {
    text: String,
    line_starts: Vec<usize>,
    saves: usize,
}

impl MemoryBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let line_starts = compute_line_starts(&text);
        Self {
            text,
            line_starts,
            saves: 0,
        }
    }

    /// Number of times `save` has been called.
    pub fn saves(&self) -> usize {
        self.saves
    }

    fn check_line(&self, line: usize) -> Result<usize> {
        self.line_starts
            .get(line)
            .copied()
            .ok_or(Error::BadLine { line })
    }

    fn line_end_with_delimiter(&self, line: usize) -> usize {
        self.line_starts
            .get(line + 1)
            .copied()
            .unwrap_or(self.text.len())
    }
}

impl Default for MemoryBuffer {
    fn default() -> Self {
        Self::new(String::new())
    }
}

fn compute_line_starts(text: &str) -> Vec<usize> {
    let bytes = text.as_bytes();
    let mut starts = vec![0];
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' if bytes.get(i + 1) == Some(&b'\n') => {
                starts.push(i + 2);
                i += 2;
            }
            b'\r' | b'\n' => {
                starts.push(i + 1);
                i += 1;
            }
            _ => i += 1,
        }
    }
    starts
}

impl TextBuffer for MemoryBuffer {
    fn text(&self) -> &str {
        &self.text
    }

    fn replace(&mut self, offset: usize, length: usize, text: &str) -> Result<()> {
        let end = offset
            .checked_add(length)
            .ok_or(Error::BadLocation { offset })?;
        if end > self.text.len() {
            return Err(Error::BadLocation { offset: end });
        }
        if !self.text.is_char_boundary(offset) {
            return Err(Error::BadLocation { offset });
        }
        if !self.text.is_char_boundary(end) {
            return Err(Error::BadLocation { offset: end });
        }
        self.text.replace_range(offset..end, text);
        self.line_starts = compute_line_starts(&self.text);
        Ok(())
    }

    fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    fn line_of_offset(&self, offset: usize) -> Result<usize> {
        if offset > self.text.len() {
            return Err(Error::BadLocation { offset });
        }
        Ok(match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        })
    }

    fn line_offset(&self, line: usize) -> Result<usize> {
        self.check_line(line)
    }

    fn line_length(&self, line: usize) -> Result<usize> {
        let start = self.check_line(line)?;
        Ok(self.line_end_with_delimiter(line) - start)
    }

    fn line_delimiter_length(&self, line: usize) -> Result<usize> {
        self.check_line(line)?;
        if line + 1 >= self.line_starts.len() {
            return Ok(0);
        }
        let end = self.line_end_with_delimiter(line);
        if self.text.as_bytes()[..end].ends_with(b"\r\n") {
            Ok(2)
        } else {
            Ok(1)
        }
    }

    fn save(&mut self) -> Result<()> {
        self.saves += 1;
        Ok(())
    }
}

/// A buffer loaded from a file on disk and written back on `save`.
///
/// The file's length and modification time are remembered at load and save;
/// if either changes behind our back the buffer reports itself out of sync.
#[derive(Debug)]
pub struct FileBuffer {
    path: PathBuf,
    inner: MemoryBuffer,
    disk_stamp: Option<(u64, SystemTime)>,
}

impl FileBuffer {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = fs::read_to_string(&path)?;
        let disk_stamp = disk_stamp(&path);
        Ok(Self {
            path,
            inner: MemoryBuffer::new(content),
            disk_stamp,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn disk_stamp(path: &Path) -> Option<(u64, SystemTime)> {
    let meta = fs::metadata(path).ok()?;
    Some((meta.len(), meta.modified().ok()?))
}

impl TextBuffer for FileBuffer {
    fn text(&self) -> &str {
        self.inner.text()
    }

    fn replace(&mut self, offset: usize, length: usize, text: &str) -> Result<()> {
        self.inner.replace(offset, length, text)
    }

    fn line_count(&self) -> usize {
        self.inner.line_count()
    }

    fn line_of_offset(&self, offset: usize) -> Result<usize> {
        self.inner.line_of_offset(offset)
    }

    fn line_offset(&self, line: usize) -> Result<usize> {
        self.inner.line_offset(line)
    }

    fn line_length(&self, line: usize) -> Result<usize> {
        self.inner.line_length(line)
    }

    fn line_delimiter_length(&self, line: usize) -> Result<usize> {
        self.inner.line_delimiter_length(line)
    }

    fn check_sync(&self) -> Result<()> {
        if disk_stamp(&self.path) == self.disk_stamp {
            Ok(())
        } else {
            Err(Error::OutOfSync(self.path.clone()))
        }
    }

    fn save(&mut self) -> Result<()> {
        fs::write(&self.path, self.inner.text())
            .map_err(|e| Error::Persist(format!("{}: {e}", self.path.display())))?;
        self.disk_stamp = disk_stamp(&self.path);
        self.inner.saves += 1;
        debug!(path = %self.path.display(), "buffer saved");
        Ok(())
    }
}
