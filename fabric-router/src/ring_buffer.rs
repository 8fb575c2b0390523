// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Wrap-around buffer arithmetic.
//!
//! Pointers count over `[0, 2 * capacity)` so that a full buffer
//! (`write - read == capacity`) can be told apart from an empty one
//! (`write == read`). The physical slot of a pointer is `ptr % capacity`.
//!
//! A [`RingBuffer`] only holds the pointers. The data lives in node memory at
//! `base_offset` and is moved by the channel that owns the buffer.

use crate::types::WORD_BYTES;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingBuffer {
    capacity_words: u32,
    base_offset: u32,
    write_ptr: u32,
    read_ptr: u32,
}

impl RingBuffer {
    /// Create an empty buffer of `capacity_words` entries placed at
    /// `base_offset` in node memory.
    ///
    /// # Panics
    ///
    /// If the capacity is zero or too large for pointers to count to twice
    /// the capacity.
    #[must_use]
    pub fn new(base_offset: u32, capacity_words: u32) -> Self {
        assert!(capacity_words > 0, "ring buffer capacity must be non-zero");
        assert!(
            capacity_words <= u32::MAX / 2,
            "ring buffer capacity {capacity_words} is too large"
        );
        Self {
            capacity_words,
            base_offset,
            write_ptr: 0,
            read_ptr: 0,
        }
    }

    /// Create a view over a buffer whose pointers are already known, for
    /// example the source buffer described by a pull request.
    #[must_use]
    pub fn with_pointers(base_offset: u32, capacity_words: u32, write_ptr: u32, read_ptr: u32) -> Self {
        let mut ring = Self::new(base_offset, capacity_words);
        ring.write_ptr = write_ptr % ring.modulus();
        ring.read_ptr = read_ptr % ring.modulus();
        ring
    }

    #[must_use]
    pub fn capacity_words(&self) -> u32 {
        self.capacity_words
    }

    #[must_use]
    pub fn base_offset(&self) -> u32 {
        self.base_offset
    }

    #[must_use]
    pub fn write_ptr(&self) -> u32 {
        self.write_ptr
    }

    #[must_use]
    pub fn read_ptr(&self) -> u32 {
        self.read_ptr
    }

    fn modulus(&self) -> u32 {
        2 * self.capacity_words
    }

    /// Number of entries from `from` up to `to`.
    #[must_use]
    pub fn distance(&self, from: u32, to: u32) -> u32 {
        if to >= from {
            to - from
        } else {
            self.modulus() - from + to
        }
    }

    #[must_use]
    pub fn occupied_words(&self) -> u32 {
        self.distance(self.read_ptr, self.write_ptr)
    }

    #[must_use]
    pub fn free_words(&self) -> u32 {
        self.capacity_words - self.occupied_words()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.write_ptr == self.read_ptr
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.free_words() == 0
    }

    /// Entries that can be accessed from `ptr` before the physical end of
    /// the buffer.
    #[must_use]
    pub fn words_before_wrap(&self, ptr: u32) -> u32 {
        self.capacity_words - self.index(ptr)
    }

    /// `ptr` moved on by `num_words`, wrapped into the pointer range.
    #[must_use]
    pub fn advance(&self, ptr: u32, num_words: u32) -> u32 {
        ((u64::from(ptr) + u64::from(num_words)) % u64::from(self.modulus())) as u32
    }

    /// Physical slot of `ptr`.
    #[must_use]
    pub fn index(&self, ptr: u32) -> u32 {
        ptr % self.capacity_words
    }

    /// Byte offset in node memory of the word at `ptr`.
    #[must_use]
    pub fn byte_offset(&self, ptr: u32) -> u32 {
        self.base_offset + self.index(ptr) * WORD_BYTES
    }

    /// Record `num_words` written.
    pub fn advance_write(&mut self, num_words: u32) {
        debug_assert!(num_words <= self.free_words(), "ring buffer overrun");
        self.write_ptr = self.advance(self.write_ptr, num_words);
    }

    /// Record `num_words` consumed.
    pub fn advance_read(&mut self, num_words: u32) {
        debug_assert!(num_words <= self.occupied_words(), "ring buffer underrun");
        self.read_ptr = self.advance(self.read_ptr, num_words);
    }

    /// Take a write pointer published by the other end of the buffer.
    pub fn set_write_ptr(&mut self, write_ptr: u32) {
        self.write_ptr = write_ptr % self.modulus();
    }

    /// Take a read pointer published by the other end of the buffer.
    pub fn set_read_ptr(&mut self, read_ptr: u32) {
        self.read_ptr = read_ptr % self.modulus();
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn empty_and_full() {
        let mut ring = RingBuffer::new(0, 4);
        assert!(ring.is_empty());
        assert_eq!(ring.free_words(), 4);

        ring.advance_write(4);
        assert!(ring.is_full());
        assert_eq!(ring.write_ptr(), 4);
        assert_eq!(ring.occupied_words(), 4);

        ring.advance_read(3);
        ring.advance_write(3);
        assert_eq!(ring.write_ptr(), 7);
        assert_eq!(ring.read_ptr(), 3);
        assert_eq!(ring.occupied_words(), 4);

        ring.advance_read(2);
        assert_eq!(ring.read_ptr(), 5);
        ring.advance_write(1);
        assert_eq!(ring.write_ptr(), 0);
        assert_eq!(ring.occupied_words(), 3);
    }

    #[test]
    fn wrap_geometry() {
        let ring = RingBuffer::new(0x100, 8);
        assert_eq!(ring.words_before_wrap(0), 8);
        assert_eq!(ring.words_before_wrap(6), 2);
        assert_eq!(ring.words_before_wrap(14), 2);
        assert_eq!(ring.byte_offset(9), 0x100 + WORD_BYTES);
        assert_eq!(ring.advance(15, 3), 2);
    }

    #[test]
    fn largest_capacity_wraps() {
        let capacity = u32::MAX / 2;
        let mut ring = RingBuffer::with_pointers(0, capacity, 2 * capacity - 1, capacity);
        assert_eq!(ring.occupied_words(), capacity - 1);
        ring.advance_write(1);
        assert_eq!(ring.write_ptr(), 0);
        assert!(ring.is_full());
    }

    #[test]
    #[should_panic(expected = "too large")]
    fn oversized_capacity_panics() {
        let _ = RingBuffer::new(0, u32::MAX / 2 + 1);
    }

    #[test]
    fn invariant_under_random_advances() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for capacity in [1, 3, 16, 1024] {
            let mut ring = RingBuffer::new(0, capacity);
            let mut expected_occupied = 0;
            for _ in 0..10_000 {
                if rng.gen_bool(0.5) {
                    let n = rng.gen_range(0..=ring.free_words());
                    ring.advance_write(n);
                    expected_occupied += n;
                } else {
                    let n = rng.gen_range(0..=ring.occupied_words());
                    ring.advance_read(n);
                    expected_occupied -= n;
                }
                assert_eq!(ring.occupied_words() + ring.free_words(), capacity);
                assert_eq!(ring.occupied_words(), expected_occupied);
                assert!(ring.write_ptr() < 2 * capacity);
                assert!(ring.read_ptr() < 2 * capacity);
            }
        }
    }
}
