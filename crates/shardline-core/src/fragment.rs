//! Fragments and the fragmenter.
//!
//! A fragment is a contiguous, non-overlapping slice of the source. The
//! [`Fragmenter`] reads the source sequentially and yields fragments lazily,
//! so at most one fragment buffer is live per call.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::pool::BufferPool;
use crate::source::read_full;

/// Position and size of one fragment within the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FragmentSpec {
    pub index: usize,
    pub offset: u64,
    pub length: usize,
}

impl FragmentSpec {
    /// One past the last byte covered by this fragment.
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }
}

/// A fragment: its spec plus an owned buffer of exactly `spec.length` bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Fragment {
    spec: FragmentSpec,
    bytes: Vec<u8>,
}

impl Fragment {
    /// Build a fragment from its position and payload.
    ///
    /// The length is taken from the buffer.
    pub fn new(index: usize, offset: u64, bytes: Vec<u8>) -> Self {
        Self {
            spec: FragmentSpec {
                index,
                offset,
                length: bytes.len(),
            },
            bytes,
        }
    }

    pub fn spec(&self) -> &FragmentSpec {
        &self.spec
    }

    pub fn index(&self) -> usize {
        self.spec.index
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Release the payload buffer, e.g. back to a [`BufferPool`].
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn into_parts(self) -> (FragmentSpec, Vec<u8>) {
        (self.spec, self.bytes)
    }
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fragment")
            .field("index", &self.spec.index)
            .field("offset", &self.spec.offset)
            .field("length", &self.spec.length)
            .finish()
    }
}

/// Bytes covered by `max_parts` fragments of `fragment_size`.
pub fn fragment_capacity(fragment_size: usize, max_parts: usize) -> u64 {
    (fragment_size as u64).saturating_mul(max_parts as u64)
}

/// Compute the fragment layout for a source of `total_len` bytes.
///
/// Equivalent to what a [`Fragmenter`] yields, without reading any data.
pub fn plan_fragments(
    total_len: u64,
    fragment_size: usize,
    max_parts: usize,
) -> Result<Vec<FragmentSpec>> {
    check_params(fragment_size, max_parts)?;

    let covered = total_len.min(fragment_capacity(fragment_size, max_parts));
    let count = covered.div_ceil(fragment_size as u64) as usize;

    Ok((0..count)
        .map(|index| {
            let offset = index as u64 * fragment_size as u64;
            let length = (covered - offset).min(fragment_size as u64) as usize;
            FragmentSpec {
                index,
                offset,
                length,
            }
        })
        .collect())
}

fn check_params(fragment_size: usize, max_parts: usize) -> Result<()> {
    if fragment_size == 0 {
        return Err(CoreError::InvalidParameter(
            "fragment_size must be greater than zero".into(),
        ));
    }
    if max_parts == 0 {
        return Err(CoreError::InvalidParameter(
            "max_parts must be greater than zero".into(),
        ));
    }
    Ok(())
}

/// Split `source` into fragments of `fragment_size` bytes, at most `max_parts`.
pub fn split<R: Read>(source: R, fragment_size: usize, max_parts: usize) -> Result<Fragmenter<R>> {
    Fragmenter::new(source, fragment_size, max_parts)
}

/// Lazy, finite splitter over a byte source.
///
/// Yields `Result<Fragment>`; each item holds exactly
/// `min(fragment_size, remaining)` bytes. Stops after `max_parts` fragments
/// or at end of input, whichever comes first, and never yields an empty
/// fragment. After an I/O error the iterator is fused.
pub struct Fragmenter<R> {
    source: R,
    fragment_size: usize,
    max_parts: usize,
    next_index: usize,
    offset: u64,
    done: bool,
    pool: BufferPool,
}

impl<R: Read> Fragmenter<R> {
    /// Create a fragmenter. Fails if either parameter is zero.
    pub fn new(source: R, fragment_size: usize, max_parts: usize) -> Result<Self> {
        check_params(fragment_size, max_parts)?;
        Ok(Self {
            source,
            fragment_size,
            max_parts,
            next_index: 0,
            offset: 0,
            done: false,
            pool: BufferPool::unpooled(fragment_size),
        })
    }

    /// Draw fragment buffers from `pool` instead of allocating each time.
    pub fn with_pool(mut self, pool: BufferPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    pub fn max_parts(&self) -> usize {
        self.max_parts
    }

    /// Number of fragments yielded since the start (or last rewind).
    pub fn produced(&self) -> usize {
        self.next_index
    }

    /// Hand a fragment's buffer back to the pool.
    pub fn recycle(&mut self, fragment: Fragment) {
        let index = fragment.index();
        self.pool.release(index, fragment.into_bytes());
    }

    fn read_next(&mut self) -> Result<Option<Fragment>> {
        if self.done || self.next_index >= self.max_parts {
            self.done = true;
            return Ok(None);
        }

        let index = self.next_index;
        let mut buf = self.pool.acquire(index);
        buf.resize(self.fragment_size, 0);

        let n = match read_full(&mut self.source, &mut buf) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Err(e.into());
            }
        };

        if n == 0 {
            self.done = true;
            self.pool.release(index, buf);
            return Ok(None);
        }
        if n < self.fragment_size {
            // Short read means the source is exhausted.
            self.done = true;
        }
        buf.truncate(n);

        let fragment = Fragment::new(index, self.offset, buf);
        self.next_index += 1;
        self.offset += n as u64;
        Ok(Some(fragment))
    }
}

impl<R: Read + Seek> Fragmenter<R> {
    /// Restart from the beginning of the source.
    pub fn rewind(&mut self) -> Result<()> {
        self.source.seek(SeekFrom::Start(0))?;
        self.next_index = 0;
        self.offset = 0;
        self.done = false;
        Ok(())
    }
}

impl<R: Read> Iterator for Fragmenter<R> {
    type Item = Result<Fragment>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceStream;
    use proptest::prelude::*;
    use std::io;

    fn collect(source: Vec<u8>, size: usize, max_parts: usize) -> Vec<Fragment> {
        split(SourceStream::from_bytes(source), size, max_parts)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_million_byte_scenario() {
        let source: Vec<u8> = (0..1_000_000u32).map(|i| (i % 256) as u8).collect();
        let fragments = collect(source.clone(), 300_000, 10);

        let lengths: Vec<usize> = fragments.iter().map(Fragment::len).collect();
        assert_eq!(lengths, vec![300_000, 300_000, 300_000, 100_000]);
        assert_eq!(fragments[3].spec().offset, 900_000);
        assert_eq!(fragments[3].bytes(), &source[900_000..]);
    }

    #[test]
    fn test_exact_multiple_has_full_last_fragment() {
        let fragments = collect(vec![1u8; 40], 10, 8);
        assert_eq!(fragments.len(), 4);
        assert!(fragments.iter().all(|f| f.len() == 10));
    }

    #[test]
    fn test_max_parts_truncates_silently() {
        let fragments = collect(vec![9u8; 100], 10, 3);
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments.iter().map(Fragment::len).sum::<usize>(), 30);
    }

    #[test]
    fn test_empty_source_yields_nothing() {
        assert!(collect(vec![], 10, 3).is_empty());
    }

    #[test]
    fn test_zero_params_rejected() {
        assert!(matches!(
            split(io::empty(), 0, 1),
            Err(CoreError::InvalidParameter(_))
        ));
        assert!(matches!(
            split(io::empty(), 1, 0),
            Err(CoreError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_rewind_restarts_sequence() {
        let mut fragmenter = split(SourceStream::from_bytes(vec![5u8; 25]), 10, 10).unwrap();
        let first: Vec<_> = fragmenter.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(fragmenter.produced(), 3);

        fragmenter.rewind().unwrap();
        let second: Vec<_> = fragmenter.collect::<Result<_>>().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_read_error_is_reported_once() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "disk gone"))
            }
        }

        let mut fragmenter = split(Broken, 4, 4).unwrap();
        assert!(matches!(fragmenter.next(), Some(Err(CoreError::Io(_)))));
        assert!(fragmenter.next().is_none());
    }

    #[test]
    fn test_pooled_fragmenter_reuses_buffers() {
        let mut fragmenter = split(SourceStream::from_bytes(vec![3u8; 30]), 10, 3)
            .unwrap()
            .with_pool(BufferPool::new(1, 10));

        let first = fragmenter.next().unwrap().unwrap();
        let ptr = first.bytes().as_ptr();
        fragmenter.recycle(first);

        let second = fragmenter.next().unwrap().unwrap();
        assert_eq!(second.bytes().as_ptr(), ptr);
        assert_eq!(second.index(), 1);
        assert_eq!(fragmenter.pool().slot_count(), 1);
    }

    proptest! {
        #[test]
        fn prop_fragments_cover_prefix(
            len in 0usize..5_000,
            size in 1usize..700,
            max_parts in 1usize..20,
        ) {
            let source: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
            let fragments = collect(source.clone(), size, max_parts);

            let covered = len.min(size * max_parts);
            let expected_count = covered.div_ceil(size);
            prop_assert_eq!(fragments.len(), expected_count);

            let total: usize = fragments.iter().map(Fragment::len).sum();
            prop_assert_eq!(total, covered);

            for (i, f) in fragments.iter().enumerate() {
                prop_assert_eq!(f.index(), i);
                prop_assert!(f.len() > 0);
                if i + 1 < fragments.len() {
                    prop_assert_eq!(f.len(), size);
                }
                let start = f.spec().offset as usize;
                prop_assert_eq!(f.bytes(), &source[start..start + f.len()]);
            }

            let plan = plan_fragments(len as u64, size, max_parts).unwrap();
            let specs: Vec<FragmentSpec> = fragments.iter().map(|f| *f.spec()).collect();
            prop_assert_eq!(plan, specs);
        }
    }
}
