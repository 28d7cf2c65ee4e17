//! Source streams and deterministic test input.

use std::fs::File;
use std::io::{self, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::Result;

/// Block size used when generating test files.
const GENERATE_BLOCK_SIZE: usize = 1024 * 1024;

/// An ordered, finite byte source of known length.
///
/// The length is captured when the stream is opened and never changes; the
/// fragmenter relies on it to plan the fragment layout up front.
#[derive(Debug)]
pub struct SourceStream<R> {
    inner: R,
    len: u64,
}

impl SourceStream<File> {
    /// Open a file as a source stream.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { inner: file, len })
    }
}

impl SourceStream<Cursor<Vec<u8>>> {
    /// Wrap an in-memory buffer.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let len = bytes.len() as u64;
        Self {
            inner: Cursor::new(bytes),
            len,
        }
    }
}

impl<R> SourceStream<R> {
    /// Wrap an arbitrary reader whose total length is already known.
    pub fn with_len(inner: R, len: u64) -> Self {
        Self { inner, len }
    }

    /// Total length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for SourceStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Seek> Seek for SourceStream<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// Read until `buf` is full or the reader is exhausted.
///
/// Returns the number of bytes read; short only at end of input.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Write a deterministic test file of `size` bytes.
///
/// Byte `i` of the file is `i mod 256`. The file is written in 1 MiB blocks,
/// including a final partial block. Returns the number of bytes written.
pub fn generate_test_file(path: impl AsRef<Path>, size: u64) -> Result<u64> {
    let mut out = BufWriter::new(File::create(path)?);

    let block: Vec<u8> = (0..GENERATE_BLOCK_SIZE).map(|i| (i % 256) as u8).collect();
    let mut remaining = size;
    while remaining > 0 {
        let n = remaining.min(GENERATE_BLOCK_SIZE as u64) as usize;
        out.write_all(&block[..n])?;
        remaining -= n as u64;
    }
    out.flush()?;

    Ok(size)
}
