// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A buffer that moves socket data between nodes over the network on chip.
//!
//! The reader pulls from a sender's buffer described by a [`PullRequest`]
//! and pushes into a destination ring whose pointers live in the
//! destination's memory. There is no packet structure, only words.

use std::sync::Arc;

use fabric_track::entity::Entity;
use fabric_track::trace;

use crate::pull_request::PullRequest;
use crate::ring_buffer::RingBuffer;
use crate::transport::Transport;
use crate::types::GlobalAddress;

/// A ring buffer in another node's memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketDestination {
    pub buffer_address: GlobalAddress,
    pub capacity_words: u32,
    /// Where the destination's write pointer is published.
    pub write_ptr_address: GlobalAddress,
    /// Where the destination publishes how far it has read.
    pub read_ptr_address: GlobalAddress,
}

pub struct SocketReader {
    pub entity: Arc<Entity>,
    ring: RingBuffer,
    max_burst_words: u32,
    destination: SocketDestination,
    remote: RingBuffer,
}

impl SocketReader {
    #[must_use]
    pub fn new(
        parent: &Arc<Entity>,
        name: &str,
        buffer_offset: u32,
        capacity_words: u32,
        max_burst_words: u32,
        destination: SocketDestination,
    ) -> Self {
        Self {
            entity: Arc::new(Entity::new(parent, name)),
            ring: RingBuffer::new(buffer_offset, capacity_words),
            max_burst_words,
            destination,
            remote: RingBuffer::new(
                destination.buffer_address.offset(),
                destination.capacity_words,
            ),
        }
    }

    #[must_use]
    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    /// Pull the next piece of `request` into the local buffer.
    ///
    /// One copy is made, so it never crosses the local or the source wrap.
    /// The request's read pointer is advanced and acknowledged at its
    /// `ack_address`. Returns the words pulled.
    pub fn pull(&mut self, t: &mut impl Transport, request: &mut PullRequest, words_requested: u32) -> u32 {
        let mut source = request.source_ring();
        let num_words = words_requested
            .min(source.occupied_words())
            .min(source.words_before_wrap(source.read_ptr()))
            .min(self.ring.free_words())
            .min(self.ring.words_before_wrap(self.ring.write_ptr()));
        if num_words == 0 {
            return 0;
        }

        let src = GlobalAddress::new(
            request.source_buffer_address.node(),
            source.byte_offset(source.read_ptr()),
        );
        t.remote_read_words(src, self.ring.byte_offset(self.ring.write_ptr()), num_words);
        self.ring.advance_write(num_words);

        source.advance_read(num_words);
        request.read_ptr = source.read_ptr();
        t.remote_write(request.ack_address, request.read_ptr);
        trace!(self.entity ; "pulled {num_words} words from {src}");
        num_words
    }

    /// Push buffered words into the destination ring and publish its new
    /// write pointer. Returns the words pushed.
    pub fn push(&mut self, t: &mut impl Transport) -> u32 {
        self.remote
            .set_read_ptr(t.remote_read(self.destination.read_ptr_address));
        let to_send = self
            .ring
            .occupied_words()
            .min(self.remote.free_words())
            .min(self.max_burst_words);
        if to_send == 0 {
            return 0;
        }

        let node = self.destination.buffer_address.node();
        let mut sent = 0;
        while sent < to_send {
            let chunk = (to_send - sent)
                .min(self.ring.words_before_wrap(self.ring.read_ptr()))
                .min(self.remote.words_before_wrap(self.remote.write_ptr()));
            t.remote_write_words(
                self.ring.byte_offset(self.ring.read_ptr()),
                GlobalAddress::new(node, self.remote.byte_offset(self.remote.write_ptr())),
                chunk,
            );
            self.ring.advance_read(chunk);
            self.remote.advance_write(chunk);
            sent += chunk;
        }

        t.remote_write(self.destination.write_ptr_address, self.remote.write_ptr());
        trace!(self.entity ; "pushed {to_send} words");
        to_send
    }
}

#[cfg(test)]
mod tests {
    use fabric_engine::test_helpers::start_test;

    use super::*;
    use crate::memory::SystemMemory;
    use crate::transport::Memory;
    use crate::types::{NodeId, WORD_BYTES};

    /// A source ring of 8 words at 0x100 on node 0 holding 100..108, ready
    /// to be pulled from the start.
    fn full_source(sender: &mut impl Memory) -> PullRequest {
        for i in 0..8u32 {
            sender.write_u32(0x100 + i * WORD_BYTES, 100 + i);
        }
        PullRequest {
            write_ptr: 8,
            read_ptr: 0,
            size_bytes: 8 * WORD_BYTES,
            buffer_capacity: 8,
            source_buffer_address: GlobalAddress::new(NodeId(0), 0x100),
            ack_address: GlobalAddress::new(NodeId(0), 0x80),
            flags: 0,
        }
    }

    fn destination(capacity_words: u32) -> SocketDestination {
        SocketDestination {
            buffer_address: GlobalAddress::new(NodeId(2), 0x200),
            capacity_words,
            write_ptr_address: GlobalAddress::new(NodeId(2), 0x10),
            read_ptr_address: GlobalAddress::new(NodeId(2), 0x20),
        }
    }

    fn destination_words(receiver: &impl Memory, num_words: u32) -> Vec<u32> {
        (0..num_words)
            .map(|i| receiver.read_u32(0x200 + i * WORD_BYTES))
            .collect()
    }

    #[test]
    fn push_waits_for_destination_space() {
        let engine = start_test(file!());
        let system = SystemMemory::new(engine.top(), engine.clock(), 3, 4096);
        let mut sender = system.port(NodeId(0));
        let mut reader_port = system.port(NodeId(1));
        let mut receiver = system.port(NodeId(2));

        let mut request = full_source(&mut sender);
        let mut reader = SocketReader::new(engine.top(), "reader", 0x400, 16, 8, destination(4));
        assert_eq!(reader.pull(&mut reader_port, &mut request, 8), 8);

        assert_eq!(reader.push(&mut reader_port), 4);
        assert_eq!(receiver.read_u32(0x10), 4);

        // Nothing moves until the destination has read something.
        assert_eq!(reader.push(&mut reader_port), 0);
        assert_eq!(receiver.read_u32(0x10), 4);
        assert_eq!(reader.ring().occupied_words(), 4);

        receiver.write_u32(0x20, 3);
        assert_eq!(reader.push(&mut reader_port), 3);
        assert_eq!(receiver.read_u32(0x10), 7);
        assert_eq!(destination_words(&receiver, 4), vec![104, 105, 106, 103]);
        assert_eq!(reader.push(&mut reader_port), 0);

        receiver.write_u32(0x20, 7);
        assert_eq!(reader.push(&mut reader_port), 1);
        assert_eq!(receiver.read_u32(0x10), 0);
        assert_eq!(destination_words(&receiver, 4), vec![104, 105, 106, 107]);
        assert!(reader.ring().is_empty());
    }

    #[test]
    fn pull_is_limited_by_local_space() {
        let engine = start_test(file!());
        let system = SystemMemory::new(engine.top(), engine.clock(), 3, 4096);
        let mut sender = system.port(NodeId(0));
        let mut reader_port = system.port(NodeId(1));
        let receiver = system.port(NodeId(2));

        let mut request = full_source(&mut sender);
        let mut reader = SocketReader::new(engine.top(), "reader", 0x400, 4, 3, destination(16));

        assert_eq!(reader.pull(&mut reader_port, &mut request, 8), 4);
        assert_eq!(sender.read_u32(0x80), 4);
        assert_eq!(reader.pull(&mut reader_port, &mut request, 8), 0);
        assert_eq!(request.read_ptr, 4);

        assert_eq!(reader.push(&mut reader_port), 3);
        assert_eq!(reader.pull(&mut reader_port, &mut request, 8), 3);
        assert_eq!(reader.pull(&mut reader_port, &mut request, 8), 0);

        // The local buffer now wraps between its read and write pointers.
        assert_eq!(reader.push(&mut reader_port), 3);
        assert_eq!(reader.push(&mut reader_port), 1);
        assert_eq!(reader.pull(&mut reader_port, &mut request, 8), 1);
        assert_eq!(reader.push(&mut reader_port), 1);

        assert_eq!(request.read_ptr, 8);
        assert_eq!(sender.read_u32(0x80), 8);
        assert_eq!(receiver.read_u32(0x10), 8);
        assert_eq!(destination_words(&receiver, 8), (100..108).collect::<Vec<u32>>());
    }

    #[test]
    fn pull_stops_at_source_wrap_and_push_delivers() {
        let engine = start_test(file!());
        let system = SystemMemory::new(engine.top(), engine.clock(), 3, 4096);
        let mut sender = system.port(NodeId(0));
        let mut reader_port = system.port(NodeId(1));
        let receiver = system.port(NodeId(2));

        // Source ring of 8 words at 0x100 holding words 6, 7, 0, 1.
        for i in 0..8u32 {
            sender.write_u32(0x100 + i * WORD_BYTES, 100 + i);
        }
        let mut request = PullRequest {
            write_ptr: 10,
            read_ptr: 6,
            size_bytes: 4 * WORD_BYTES,
            buffer_capacity: 8,
            source_buffer_address: GlobalAddress::new(NodeId(0), 0x100),
            ack_address: GlobalAddress::new(NodeId(0), 0x80),
            flags: 0,
        };

        let destination = SocketDestination {
            buffer_address: GlobalAddress::new(NodeId(2), 0x200),
            capacity_words: 16,
            write_ptr_address: GlobalAddress::new(NodeId(2), 0x10),
            read_ptr_address: GlobalAddress::new(NodeId(2), 0x20),
        };
        let mut reader = SocketReader::new(engine.top(), "reader", 0x400, 16, 8, destination);

        assert_eq!(reader.pull(&mut reader_port, &mut request, 4), 2);
        assert_eq!(request.read_ptr, 8);
        assert_eq!(sender.read_u32(0x80), 8);
        assert_eq!(reader.pull(&mut reader_port, &mut request, 2), 2);
        assert_eq!(reader.pull(&mut reader_port, &mut request, 2), 0);

        assert_eq!(reader.push(&mut reader_port), 4);
        assert_eq!(receiver.read_u32(0x10), 4);
        let words: Vec<u32> = (0..4)
            .map(|i| receiver.read_u32(0x200 + i * WORD_BYTES))
            .collect();
        assert_eq!(words, vec![106, 107, 100, 101]);
        assert!(reader.ring().is_empty());
    }
}
