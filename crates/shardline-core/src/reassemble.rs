//! Reassembly of verified fragments into the output stream.

use std::io::Write;

use crate::error::{CoreError, Result};
use crate::fragment::Fragment;

/// Streams fragments into a writer in strict index order.
///
/// Each fragment is written and released immediately; only the output
/// writer's own buffering is retained between appends.
pub struct Reassembler<W> {
    out: W,
    next_index: usize,
    bytes_written: u64,
}

impl<W: Write> Reassembler<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            next_index: 0,
            bytes_written: 0,
        }
    }

    /// Index the next fragment must carry.
    pub fn next_index(&self) -> usize {
        self.next_index
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append one fragment and hand back its (now unused) buffer.
    pub fn append(&mut self, fragment: Fragment) -> Result<Vec<u8>> {
        if fragment.index() != self.next_index {
            return Err(CoreError::GapDetected {
                expected: self.next_index,
                found: Some(fragment.index()),
            });
        }

        self.out.write_all(fragment.bytes())?;
        self.bytes_written += fragment.len() as u64;
        self.next_index += 1;
        Ok(fragment.into_bytes())
    }

    /// Flush and return the writer.
    ///
    /// With `expected_count`, a missing tail is reported as a gap.
    pub fn finish(mut self, expected_count: Option<usize>) -> Result<(W, u64)> {
        if let Some(expected) = expected_count {
            if self.next_index < expected {
                return Err(CoreError::GapDetected {
                    expected: self.next_index,
                    found: None,
                });
            }
        }
        self.out.flush()?;
        Ok((self.out, self.bytes_written))
    }
}

/// Concatenate `fragments` (indices `0..N`, in order) into `out`.
///
/// Returns the number of bytes written.
pub fn combine<W, I>(fragments: I, out: W) -> Result<u64>
where
    W: Write,
    I: IntoIterator<Item = Fragment>,
{
    let mut reassembler = Reassembler::new(out);
    for fragment in fragments {
        reassembler.append(fragment)?;
    }
    let (_, written) = reassembler.finish(None)?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::split;
    use crate::source::SourceStream;

    #[test]
    fn test_combine_reproduces_source() {
        let source: Vec<u8> = (0..1_000_000u32).map(|i| (i % 256) as u8).collect();
        let fragments: Vec<Fragment> = split(SourceStream::from_bytes(source.clone()), 300_000, 10)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        let mut out = Vec::new();
        let written = combine(fragments, &mut out).unwrap();
        assert_eq!(written, 1_000_000);
        assert_eq!(out, source);
    }

    #[test]
    fn test_gap_detected() {
        let fragments = vec![Fragment::new(0, 0, vec![1]), Fragment::new(2, 2, vec![3])];
        let mut out = Vec::new();
        assert!(matches!(
            combine(fragments, &mut out),
            Err(CoreError::GapDetected {
                expected: 1,
                found: Some(2)
            })
        ));
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut r = Reassembler::new(Vec::new());
        assert!(r.append(Fragment::new(1, 0, vec![1])).is_err());
        assert_eq!(r.bytes_written(), 0);
    }

    #[test]
    fn test_missing_tail_detected_on_finish() {
        let mut r = Reassembler::new(Vec::new());
        r.append(Fragment::new(0, 0, vec![1, 2])).unwrap();
        assert!(matches!(
            r.finish(Some(3)),
            Err(CoreError::GapDetected {
                expected: 1,
                found: None
            })
        ));
    }

    #[test]
    fn test_append_returns_buffer() {
        let mut r = Reassembler::new(Vec::new());
        let buf = r.append(Fragment::new(0, 0, vec![9; 16])).unwrap();
        assert_eq!(buf.len(), 16);
        let (out, written) = r.finish(Some(1)).unwrap();
        assert_eq!(out, vec![9; 16]);
        assert_eq!(written, 16);
    }
}
