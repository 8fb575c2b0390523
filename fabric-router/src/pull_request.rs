// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Pull requests and the queue that carries them to a consumer.
//!
//! A sender never pushes data onto a link itself. It describes the data with
//! a [`PullRequest`] and places it in the queue of the consumer that owns the
//! next link, which later pulls the data at its own pace. Queue slots are
//! claimed with a fetch-add on the queue write pointer, so any number of
//! senders can share one queue without locking.
//!
//! Queue memory layout, starting at the queue base:
//!
//! | Offset | Contents |
//! |--------|----------|
//! | 0  | write pointer (free-running ticket counter) |
//! | 16 | read pointer (free-running completion counter) |
//! | 32 | slots, 64 bytes each |
//!
//! A slot holds a 48-byte body, a kind word at 48 and a validity marker at
//! 52. The marker is written last by the sender and cleared by the consumer
//! before it moves the read pointer on.
//!
//! Both pointers wrap only at `u32::MAX`, so the distance between a ticket
//! and the read pointer is exact however many senders are waiting.

use std::task::Poll;

use fabric_engine::clock::Clock;

use crate::packet::{HeaderError, PacketHeader, get_u32, get_u64, put_u32, put_u64};
use crate::ring_buffer::RingBuffer;
use crate::transport::{Memory, Transport};
use crate::types::{GlobalAddress, HEADER_BYTES, WORD_BYTES, words_for_bytes};

const WRITE_PTR_OFFSET: u32 = 0;
const READ_PTR_OFFSET: u32 = WORD_BYTES;
const SLOTS_OFFSET: u32 = 2 * WORD_BYTES;

/// Size of one queue slot.
pub const SLOT_BYTES: u32 = 4 * WORD_BYTES;
const KIND_OFFSET: u32 = HEADER_BYTES;
const VALID_OFFSET: u32 = HEADER_BYTES + 4;

const KIND_PULL: u32 = 1;
const KIND_INLINE: u32 = 2;
const SLOT_VALID: u32 = 1;

/// Bytes of memory needed by a queue of `num_slots`.
#[must_use]
pub fn queue_bytes(num_slots: u32) -> u32 {
    SLOTS_OFFSET + num_slots * SLOT_BYTES
}

/// Describes a range of a sender's ring buffer for the receiver to pull.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PullRequest {
    /// Sender's write pointer: how far data is available.
    pub write_ptr: u32,
    /// Where the pull starts; advanced by the puller.
    pub read_ptr: u32,
    /// Bytes to pull in total.
    pub size_bytes: u32,
    /// Capacity of the sender's buffer in words.
    pub buffer_capacity: u32,
    pub source_buffer_address: GlobalAddress,
    /// Where the puller publishes its read pointer.
    pub ack_address: GlobalAddress,
    pub flags: u32,
}

impl PullRequest {
    /// Byte offset of the write pointer within an encoded request.
    pub const WRITE_PTR_FIELD: u32 = 0;

    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_BYTES as usize] {
        let mut bytes = [0; HEADER_BYTES as usize];
        put_u32(&mut bytes, 0, self.write_ptr);
        put_u32(&mut bytes, 4, self.read_ptr);
        put_u32(&mut bytes, 8, self.size_bytes);
        put_u32(&mut bytes, 12, self.buffer_capacity);
        put_u64(&mut bytes, 16, self.source_buffer_address.0);
        put_u64(&mut bytes, 24, self.ack_address.0);
        put_u32(&mut bytes, 32, self.flags);
        bytes
    }

    #[must_use]
    pub fn decode(bytes: &[u8]) -> Self {
        Self {
            write_ptr: get_u32(bytes, 0),
            read_ptr: get_u32(bytes, 4),
            size_bytes: get_u32(bytes, 8),
            buffer_capacity: get_u32(bytes, 12),
            source_buffer_address: GlobalAddress(get_u64(bytes, 16)),
            ack_address: GlobalAddress(get_u64(bytes, 24)),
            flags: get_u32(bytes, 32),
        }
    }

    /// The sender's buffer as seen by the puller.
    #[must_use]
    pub fn source_ring(&self) -> RingBuffer {
        RingBuffer::with_pointers(
            self.source_buffer_address.offset(),
            self.buffer_capacity,
            self.write_ptr,
            self.read_ptr,
        )
    }

    #[must_use]
    pub fn size_words(&self) -> u32 {
        words_for_bytes(self.size_bytes)
    }
}

/// What a queue slot carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelRequest {
    /// Pull a packet from the sender's buffer.
    Pull(PullRequest),
    /// A header-only packet carried in the slot itself.
    Inline(PacketHeader),
}

impl ChannelRequest {
    fn encode(&self) -> ([u8; HEADER_BYTES as usize], u32) {
        match self {
            ChannelRequest::Pull(request) => (request.encode(), KIND_PULL),
            ChannelRequest::Inline(header) => (header.encode(), KIND_INLINE),
        }
    }
}

/// The address of a queue as known by the senders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueHandle {
    base: GlobalAddress,
    num_slots: u32,
}

impl QueueHandle {
    /// # Panics
    ///
    /// If `num_slots` is not a power of two. Tickets are free-running 32-bit
    /// counters and only a power of two keeps their slot index continuous
    /// when the counter wraps.
    #[must_use]
    pub fn new(base: GlobalAddress, num_slots: u32) -> Self {
        assert!(
            num_slots.is_power_of_two(),
            "queue slots must be a power of two, not {num_slots}"
        );
        Self { base, num_slots }
    }

    #[must_use]
    pub fn base(&self) -> GlobalAddress {
        self.base
    }

    #[must_use]
    pub fn num_slots(&self) -> u32 {
        self.num_slots
    }

    #[must_use]
    pub fn write_ptr_address(&self) -> GlobalAddress {
        self.base.add(WRITE_PTR_OFFSET)
    }

    #[must_use]
    pub fn read_ptr_address(&self) -> GlobalAddress {
        self.base.add(READ_PTR_OFFSET)
    }

    /// Address of the slot used by ticket `ptr`.
    #[must_use]
    pub fn slot_address(&self, ptr: u32) -> GlobalAddress {
        self.base
            .add(SLOTS_OFFSET + (ptr & (self.num_slots - 1)) * SLOT_BYTES)
    }

    /// Slots in use, counting claimed tickets not yet written.
    pub fn occupied(&self, t: &impl Transport) -> u32 {
        let write_ptr = t.remote_read(self.write_ptr_address());
        let read_ptr = t.remote_read(self.read_ptr_address());
        write_ptr.wrapping_sub(read_ptr)
    }

    /// Claim a slot for `request`. The request is written once the slot is
    /// free, by polling the returned [`PendingEnqueue`].
    pub fn begin_enqueue(&self, t: &mut impl Transport, request: ChannelRequest) -> PendingEnqueue {
        let ticket = t.remote_fetch_add(self.write_ptr_address(), 1);
        PendingEnqueue {
            queue: *self,
            ticket,
            request,
        }
    }

    /// Enqueue `request`, waiting a cycle between polls while the queue is
    /// full. Returns the address of the request's write pointer field.
    pub async fn enqueue<T: Transport>(
        &self,
        t: &mut T,
        clock: &Clock,
        request: ChannelRequest,
    ) -> GlobalAddress {
        let pending = self.begin_enqueue(t, request);
        loop {
            if let Poll::Ready(address) = pending.poll(t) {
                return address;
            }
            clock.wait_cycles(1).await;
        }
    }
}

/// A claimed queue slot waiting for space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingEnqueue {
    queue: QueueHandle,
    ticket: u32,
    request: ChannelRequest,
}

impl PendingEnqueue {
    #[must_use]
    pub fn ticket(&self) -> u32 {
        self.ticket
    }

    #[must_use]
    pub fn request(&self) -> &ChannelRequest {
        &self.request
    }

    /// Write the request if its slot has been released by the consumer.
    ///
    /// Returns the address of the written request's write pointer field.
    /// A full queue is reported as `Pending` and the call is simply repeated
    /// later.
    pub fn poll(&self, t: &mut impl Transport) -> Poll<GlobalAddress> {
        let read_ptr = t.remote_read(self.queue.read_ptr_address());
        if self.ticket.wrapping_sub(read_ptr) >= self.queue.num_slots {
            return Poll::Pending;
        }

        let slot = self.queue.slot_address(self.ticket);
        let (body, kind) = self.request.encode();
        for (i, word) in body.chunks_exact(4).enumerate() {
            t.remote_write(slot.add(4 * i as u32), get_u32(word, 0));
        }
        t.remote_write(slot.add(KIND_OFFSET), kind);
        t.remote_write(slot.add(VALID_OFFSET), SLOT_VALID);
        Poll::Ready(slot.add(PullRequest::WRITE_PTR_FIELD))
    }
}

/// The consumer's side of a queue in its own memory.
#[derive(Clone, Debug)]
pub struct PullRequestQueue {
    offset: u32,
    num_slots: u32,
    read_ptr: u32,
}

impl PullRequestQueue {
    /// A queue of `num_slots` at `offset` in local memory.
    ///
    /// # Panics
    ///
    /// If `num_slots` is not a power of two.
    #[must_use]
    pub fn new(offset: u32, num_slots: u32) -> Self {
        assert!(
            num_slots.is_power_of_two(),
            "queue slots must be a power of two, not {num_slots}"
        );
        Self {
            offset,
            num_slots,
            read_ptr: 0,
        }
    }

    /// Clear the pointers and all slots.
    pub fn init(&mut self, t: &mut impl Memory) {
        t.write_bytes(self.offset, &vec![0; queue_bytes(self.num_slots) as usize]);
        self.read_ptr = 0;
    }

    #[must_use]
    pub fn num_slots(&self) -> u32 {
        self.num_slots
    }

    /// The handle senders use to reach this queue.
    pub fn handle(&self, t: &impl Transport) -> QueueHandle {
        QueueHandle::new(t.local_address(self.offset), self.num_slots)
    }

    fn slot_offset(&self) -> u32 {
        self.offset + SLOTS_OFFSET + (self.read_ptr & (self.num_slots - 1)) * SLOT_BYTES
    }

    /// Slots claimed by senders and not yet completed.
    pub fn occupied(&self, t: &impl Memory) -> u32 {
        let write_ptr = t.read_u32(self.offset + WRITE_PTR_OFFSET);
        write_ptr.wrapping_sub(self.read_ptr)
    }

    /// The request at the head of the queue, once its sender has finished
    /// writing it.
    pub fn peek(&self, t: &impl Memory) -> Option<Result<ChannelRequest, HeaderError>> {
        let slot = self.slot_offset();
        if t.read_u32(slot + VALID_OFFSET) != SLOT_VALID {
            return None;
        }
        let mut body = [0; HEADER_BYTES as usize];
        t.read_bytes(slot, &mut body);
        if t.read_u32(slot + KIND_OFFSET) == KIND_INLINE {
            Some(PacketHeader::decode(&body).map(ChannelRequest::Inline))
        } else {
            Some(Ok(ChannelRequest::Pull(PullRequest::decode(&body))))
        }
    }

    /// The write pointer currently published in the head request.
    pub fn head_write_ptr(&self, t: &impl Memory) -> u32 {
        t.read_u32(self.slot_offset() + PullRequest::WRITE_PTR_FIELD)
    }

    /// Release the head slot: clear its marker, then move the read pointer.
    pub fn complete(&mut self, t: &mut impl Memory) {
        let slot = self.slot_offset();
        t.write_u32(slot + VALID_OFFSET, 0);
        self.read_ptr = self.read_ptr.wrapping_add(1);
        t.write_u32(self.offset + READ_PTR_OFFSET, self.read_ptr);
    }
}
