//! Bounded contiguous byte arena with first-fit allocation (§5).
//!
//! Used to stage splats between pipeline stages (e.g. the [`crate::pipeline::copy`] pinned host
//! buffer). Allocation blocks the caller when no contiguous free span is currently large enough;
//! frees may happen in any order, but the free list only coalesces neighboring spans, so
//! first-in-first-out usage (the pipeline's usual access pattern) is what keeps fragmentation low
//! in practice.

use parking_lot::{Condvar, Mutex};

/// A handle to a live allocation inside a [`CircularBuffer`]. Must be passed back to [`CircularBuffer::free`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub offset: usize,
    pub len: usize,
}

struct State {
    capacity: usize,
    /// Free spans, sorted by offset and never touching (adjacent spans are always merged)
    free_spans: Vec<(usize, usize)>,
    outstanding: usize,
}

impl State {
    fn try_alloc(&mut self, size: usize) -> Option<Allocation> {
        let (idx, (start, len)) = self
            .free_spans
            .iter()
            .copied()
            .enumerate()
            .find(|&(_, (_, len))| len >= size)?;
        if len == size {
            self.free_spans.remove(idx);
        } else {
            self.free_spans[idx] = (start + size, len - size);
        }
        self.outstanding += size;
        Some(Allocation { offset: start, len: size })
    }

    fn free(&mut self, alloc: Allocation) {
        self.outstanding = self
            .outstanding
            .checked_sub(alloc.len)
            .expect("freed more bytes than were outstanding");

        let insert_at = self
            .free_spans
            .partition_point(|&(start, _)| start < alloc.offset);
        self.free_spans.insert(insert_at, (alloc.offset, alloc.len));

        // Coalesce with the following span first, it doesn't shift indices to the left
        if insert_at + 1 < self.free_spans.len() {
            let (next_start, next_len) = self.free_spans[insert_at + 1];
            let (start, len) = self.free_spans[insert_at];
            if start + len == next_start {
                self.free_spans[insert_at] = (start, len + next_len);
                self.free_spans.remove(insert_at + 1);
            }
        }
        // Then with the preceding span
        if insert_at > 0 {
            let (prev_start, prev_len) = self.free_spans[insert_at - 1];
            let (start, len) = self.free_spans[insert_at];
            if prev_start + prev_len == start {
                self.free_spans[insert_at - 1] = (prev_start, prev_len + len);
                self.free_spans.remove(insert_at);
            }
        }
    }
}

/// A bounded, contiguous byte arena shared between pipeline stages.
pub struct CircularBuffer {
    state: Mutex<State>,
    not_full: Condvar,
}

impl CircularBuffer {
    /// Creates a new buffer with the given capacity in bytes, entirely free
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                capacity,
                free_spans: if capacity > 0 { vec![(0, capacity)] } else { vec![] },
                outstanding: 0,
            }),
            not_full: Condvar::new(),
        }
    }

    /// Total capacity of the arena in bytes
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Total bytes currently allocated
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Allocates `size` bytes, blocking the calling thread until a contiguous free span of at
    /// least that size is available. Panics if `size` exceeds the buffer's total capacity (no
    /// amount of waiting could ever satisfy the request).
    pub fn alloc(&self, size: usize) -> Allocation {
        let mut guard = self.state.lock();
        assert!(
            size <= guard.capacity,
            "allocation of {size} bytes exceeds buffer capacity {}",
            guard.capacity
        );
        loop {
            if let Some(alloc) = guard.try_alloc(size) {
                return alloc;
            }
            self.not_full.wait(&mut guard);
        }
    }

    /// Attempts to allocate without blocking; returns `None` if no span currently fits.
    pub fn try_alloc(&self, size: usize) -> Option<Allocation> {
        self.state.lock().try_alloc(size)
    }

    /// Returns the allocation to the arena, coalescing it with adjacent free spans, and wakes any
    /// threads blocked in [`CircularBuffer::alloc`].
    pub fn free(&self, alloc: Allocation) {
        self.state.lock().free(alloc);
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn alloc_and_free_reclaims_full_capacity() {
        let buf = CircularBuffer::new(1024);
        let a = buf.alloc(256);
        let b = buf.alloc(256);
        assert_eq!(buf.outstanding(), 512);
        buf.free(a);
        buf.free(b);
        assert_eq!(buf.outstanding(), 0);
        // whole capacity should be usable again as one contiguous span
        let c = buf.alloc(1024);
        assert_eq!(c.len, 1024);
    }

    #[test]
    fn first_fit_reuses_freed_middle_span() {
        let buf = CircularBuffer::new(300);
        let a = buf.alloc(100);
        let b = buf.alloc(100);
        let _c = buf.alloc(100);
        buf.free(b);
        let d = buf.try_alloc(100).unwrap();
        assert_eq!(d.offset, a.offset + a.len);
    }

    #[test]
    fn try_alloc_fails_when_fragmented() {
        let buf = CircularBuffer::new(100);
        let a = buf.alloc(50);
        let _b = buf.alloc(50);
        buf.free(a);
        // only 50 bytes free, in one span, so a 60 byte request must fail without blocking
        assert!(buf.try_alloc(60).is_none());
        assert!(buf.try_alloc(50).is_some());
    }

    #[test]
    fn alloc_blocks_until_space_is_freed() {
        let buf = Arc::new(CircularBuffer::new(100));
        let a = buf.alloc(100);
        let buf2 = Arc::clone(&buf);
        let handle = std::thread::spawn(move || buf2.alloc(100));

        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        buf.free(a);
        let second = handle.join().unwrap();
        assert_eq!(second.len, 100);
    }

    #[test]
    fn coalesces_adjacent_free_spans() {
        let buf = CircularBuffer::new(300);
        let a = buf.alloc(100);
        let b = buf.alloc(100);
        let c = buf.alloc(100);
        buf.free(a);
        buf.free(c);
        buf.free(b);
        // everything freed in a different order than allocated; should still coalesce to one span
        let whole = buf.try_alloc(300).unwrap();
        assert_eq!(whole.len, 300);
    }
}
