//! Buffer reuse for fragment payloads.
//!
//! Buffers are parked in slots keyed by `fragment_index % slot_count`. A
//! stage that is done with a fragment hands its buffer back to the slot, and
//! the next fragment landing on that slot picks it up instead of allocating.

/// Slot-indexed pool of byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    slots: Vec<Option<Vec<u8>>>,
    buffer_capacity: usize,
}

impl BufferPool {
    /// Create a pool with `slot_count` slots of `buffer_capacity` bytes.
    pub fn new(slot_count: usize, buffer_capacity: usize) -> Self {
        Self {
            slots: (0..slot_count).map(|_| None).collect(),
            buffer_capacity,
        }
    }

    /// A pool with no slots: every acquire allocates, every release drops.
    pub fn unpooled(buffer_capacity: usize) -> Self {
        Self::new(0, buffer_capacity)
    }

    /// Number of slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of buffers currently parked.
    pub fn idle(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Take an empty buffer for the fragment at `index`.
    pub fn acquire(&mut self, index: usize) -> Vec<u8> {
        match self.slot_mut(index).and_then(Option::take) {
            Some(mut buf) => {
                buf.clear();
                buf
            }
            None => Vec::with_capacity(self.buffer_capacity),
        }
    }

    /// Return the buffer used by the fragment at `index`.
    ///
    /// Dropped if the slot is already occupied.
    pub fn release(&mut self, index: usize, mut buf: Vec<u8>) {
        if let Some(slot) = self.slot_mut(index) {
            if slot.is_none() {
                buf.clear();
                *slot = Some(buf);
            }
        }
    }

    fn slot_mut(&mut self, index: usize) -> Option<&mut Option<Vec<u8>>> {
        if self.slots.is_empty() {
            return None;
        }
        let slot = index % self.slots.len();
        self.slots.get_mut(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_then_acquire_reuses_allocation() {
        let mut pool = BufferPool::new(2, 64);

        let mut buf = pool.acquire(0);
        buf.extend_from_slice(&[7u8; 64]);
        let ptr = buf.as_ptr();
        pool.release(0, buf);
        assert_eq!(pool.idle(), 1);

        // Index 2 maps to slot 0.
        let reused = pool.acquire(2);
        assert!(reused.is_empty());
        assert_eq!(reused.as_ptr(), ptr);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_occupied_slot_drops_release() {
        let mut pool = BufferPool::new(1, 8);
        pool.release(0, vec![1, 2, 3]);
        pool.release(1, vec![4, 5, 6]);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_unpooled_never_parks() {
        let mut pool = BufferPool::unpooled(16);
        pool.release(0, vec![0; 16]);
        assert_eq!(pool.idle(), 0);
        assert!(pool.acquire(0).capacity() >= 16);
    }
}
