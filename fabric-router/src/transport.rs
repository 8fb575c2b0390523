// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The hardware primitives the channels are written against.
//!
//! [`Memory`] is the node's own memory. [`Transport`] adds the link and
//! network-on-chip operations. Channels take `&mut impl Transport` for each
//! step so the same state machines run on the in-process
//! [`SystemMemory`](crate::memory::SystemMemory) or any other backend.

use crate::ring_buffer::RingBuffer;
use crate::types::{GlobalAddress, LinkId, NodeId, WORD_BYTES};

pub trait Memory {
    fn read_bytes(&self, offset: u32, buf: &mut [u8]);

    fn write_bytes(&mut self, offset: u32, data: &[u8]);

    fn read_u32(&self, offset: u32) -> u32 {
        let mut raw = [0; 4];
        self.read_bytes(offset, &mut raw);
        u32::from_le_bytes(raw)
    }

    fn write_u32(&mut self, offset: u32, value: u32) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    /// Read `buf.len()` bytes of a ring buffer starting at word `ptr`,
    /// continuing from the start of the buffer at the wrap.
    fn read_ring(&self, ring: &RingBuffer, ptr: u32, buf: &mut [u8]) {
        let first_bytes = (ring.words_before_wrap(ptr) * WORD_BYTES) as usize;
        if buf.len() <= first_bytes {
            self.read_bytes(ring.byte_offset(ptr), buf);
        } else {
            let (head, tail) = buf.split_at_mut(first_bytes);
            self.read_bytes(ring.byte_offset(ptr), head);
            self.read_bytes(ring.base_offset(), tail);
        }
    }

    /// Write `data` into a ring buffer starting at word `ptr`, continuing
    /// from the start of the buffer at the wrap.
    fn write_ring(&mut self, ring: &RingBuffer, ptr: u32, data: &[u8]) {
        let first_bytes = (ring.words_before_wrap(ptr) * WORD_BYTES) as usize;
        if data.len() <= first_bytes {
            self.write_bytes(ring.byte_offset(ptr), data);
        } else {
            let (head, tail) = data.split_at(first_bytes);
            self.write_bytes(ring.byte_offset(ptr), head);
            self.write_bytes(ring.base_offset(), tail);
        }
    }
}

pub trait Transport: Memory {
    /// The node this transport belongs to.
    fn node(&self) -> NodeId;

    /// Copy `num_words` from local memory to the memory of the node at the
    /// other end of `link`.
    fn link_send(&mut self, link: LinkId, src_offset: u32, dst_offset: u32, num_words: u32);

    /// Atomically add `delta` to the word at `address`, returning the old
    /// value.
    fn remote_fetch_add(&mut self, address: GlobalAddress, delta: i32) -> u32;

    /// Posted single-word write.
    fn remote_write(&mut self, address: GlobalAddress, value: u32);

    fn remote_read(&self, address: GlobalAddress) -> u32;

    /// Copy `num_words` from any node into local memory.
    fn remote_read_words(&mut self, src: GlobalAddress, dst_offset: u32, num_words: u32);

    /// Copy `num_words` from local memory into any node.
    fn remote_write_words(&mut self, src_offset: u32, dst: GlobalAddress, num_words: u32);

    fn local_async_write(&mut self, dst_offset: u32, data: &[u8]) {
        self.write_bytes(dst_offset, data);
    }

    /// Add `delta` to the local word at `dst_offset`, keeping bits up to and
    /// including `wrap_boundary`. Returns the old value.
    fn local_atomic_increment(&mut self, dst_offset: u32, delta: u32, wrap_boundary: u32) -> u32 {
        let old = self.read_u32(dst_offset);
        self.write_u32(dst_offset, wrap_add(old, delta, wrap_boundary));
        old
    }

    /// Wait for all local writes to complete.
    fn write_barrier(&mut self) {}

    /// Free-running cycle counter.
    fn read_wall_clock(&self) -> u64;

    /// A [`GlobalAddress`] for an offset in local memory.
    fn local_address(&self, offset: u32) -> GlobalAddress {
        GlobalAddress::new(self.node(), offset)
    }
}

/// `value + delta` keeping only bits `0..=wrap_boundary`.
#[must_use]
pub fn wrap_add(value: u32, delta: u32, wrap_boundary: u32) -> u32 {
    let sum = value.wrapping_add(delta);
    if wrap_boundary >= 31 {
        sum
    } else {
        sum & ((1 << (wrap_boundary + 1)) - 1)
    }
}
