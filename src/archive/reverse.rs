//! Backward line reading for newest-first segment files.
//!
//! Unfinished segments are written newest-first, finished segments
//! oldest-first; serving both directions means one of the two always has to
//! be read back-to-front. This reader pulls fixed-size chunks from the end
//! of the file, splits on newlines, and carries the partial line at each
//! chunk head into the next (earlier) chunk.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Chunk size for backward reads.
pub const DEFAULT_BUF_SIZE: usize = 8 * 1024 * 1024;

/// Iterator over the lines of a file, last line first.
///
/// A file ending exactly on a newline does not produce a spurious empty
/// line; interior blank lines are preserved, so reversing the output of a
/// forward read reconstructs the file's line sequence exactly.
pub struct ReverseLineReader<R> {
    inner: R,
    buf_size: usize,
    /// Bytes of the file not yet consumed (from offset 0 up).
    remaining: u64,
    /// Partial line at the head of the most recently read chunk.
    carry: Option<Vec<u8>>,
    /// Complete lines ready to emit, in emit order.
    pending: Vec<Vec<u8>>,
    first_chunk: bool,
    finished: bool,
}

impl ReverseLineReader<File> {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::new(file, DEFAULT_BUF_SIZE)
    }
}

impl<R: Read + Seek> ReverseLineReader<R> {
    pub fn new(mut inner: R, buf_size: usize) -> io::Result<Self> {
        assert!(buf_size > 0, "buffer size must be nonzero");
        let len = inner.seek(SeekFrom::End(0))?;
        Ok(ReverseLineReader {
            inner,
            buf_size,
            remaining: len,
            carry: None,
            pending: Vec::new(),
            first_chunk: true,
            finished: false,
        })
    }

    /// Read the next chunk back from the current position and queue its
    /// complete lines.
    fn fill(&mut self) -> io::Result<()> {
        let chunk_len = self.remaining.min(self.buf_size as u64);
        let start = self.remaining - chunk_len;
        self.inner.seek(SeekFrom::Start(start))?;
        let mut chunk = vec![0u8; chunk_len as usize];
        self.inner.read_exact(&mut chunk)?;
        self.remaining = start;

        // The fragment carried from the later chunk completes this chunk's
        // final line.
        if let Some(carry) = self.carry.take() {
            chunk.extend_from_slice(&carry);
        } else if self.first_chunk && chunk.last() == Some(&b'\n') {
            // A trailing newline terminates the last line rather than
            // opening an empty one.
            chunk.pop();
        }
        self.first_chunk = false;

        let mut parts: Vec<Vec<u8>> = chunk.split(|b| *b == b'\n').map(<[u8]>::to_vec).collect();
        // The first part may begin mid-line; it becomes the new carry. The
        // rest stay in file order and are popped from the tail, newest
        // first.
        self.carry = Some(parts.remove(0));
        self.pending = parts;
        Ok(())
    }
}

impl<R: Read + Seek> Iterator for ReverseLineReader<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.pending.pop() {
                return Some(Ok(String::from_utf8_lossy(&line).into_owned()));
            }
            if self.remaining > 0 {
                if let Err(e) = self.fill() {
                    self.finished = true;
                    return Some(Err(e));
                }
                continue;
            }
            if self.finished {
                return None;
            }
            self.finished = true;
            // The final carry is the first line of the file.
            return self
                .carry
                .take()
                .map(|line| Ok(String::from_utf8_lossy(&line).into_owned()));
        }
    }
}
