// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The receiving side of a link.
//!
//! The peer consumer writes packets into the producer's buffer and publishes
//! its write pointer in the producer's mailbox. The producer takes one packet
//! at a time from the buffer and either delivers it into local memory or
//! asks the consumer of the next link to pull it.
//!
//! A forwarded packet is never copied by the producer. The next hop pulls it
//! straight out of the buffer and reports progress through the ack mailbox.
//! A packet can be larger than the buffer, in which case the producer keeps
//! publishing new data to the pull request while the start of the packet is
//! being drained.

use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::task::Poll;

use fabric_track::entity::Entity;
use fabric_track::{Tag, create_and_track_tag, debug, destroy_tag, enter, error, exit, trace};

use crate::channel::{ChannelConfig, ChannelFault, ProducerLayout};
use crate::packet::{Command, PacketHeader, PacketParams};
use crate::pull_request::{ChannelRequest, PendingEnqueue, PullRequest, QueueHandle};
use crate::ring_buffer::RingBuffer;
use crate::routing::{Route, RoutingTable};
use crate::transport::{Memory, Transport};
use crate::types::{GlobalAddress, HEADER_BYTES, HEADER_WORDS, LinkId, WORD_BYTES, words_for_bytes};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProducerState {
    Idle,
    /// Part of a header has arrived.
    AwaitingHeader,
    /// Copying the payload of a local packet to its target.
    Delivering {
        header: PacketHeader,
        tag: Tag,
        target_offset: u32,
        bytes_remaining: u32,
    },
    /// Waiting for a slot in the next hop's queue.
    AwaitingCredit {
        header: PacketHeader,
        tag: Tag,
        pending: PendingEnqueue,
        published_ptr: u32,
        words_unpublished: u32,
    },
    /// The next hop is pulling the packet.
    AwaitingDrainAck {
        header: PacketHeader,
        tag: Tag,
        write_ptr_address: GlobalAddress,
        published_ptr: u32,
        words_unpublished: u32,
        words_undrained: u32,
    },
    /// A packet could not be handled. The channel makes no further progress.
    Corrupted { fault: ChannelFault },
}

pub struct Producer {
    pub entity: Arc<Entity>,
    ring: RingBuffer,
    write_ptr_mailbox: u32,
    ack_mailbox: u32,

    /// The upstream consumer's read pointer mailbox.
    upstream_ack: GlobalAddress,

    routing: Rc<RoutingTable>,
    next_hops: Vec<Option<QueueHandle>>,
    max_chunk_words: u32,

    state: ProducerState,
    completed: VecDeque<PacketHeader>,

    packets_delivered: u64,
    packets_forwarded: u64,
}

impl Producer {
    #[must_use]
    pub fn new(
        parent: &Arc<Entity>,
        name: &str,
        layout: &ProducerLayout,
        upstream_ack: GlobalAddress,
        routing: Rc<RoutingTable>,
        config: &ChannelConfig,
    ) -> Self {
        Self {
            entity: Arc::new(Entity::new(parent, name)),
            ring: RingBuffer::new(layout.buffer_offset, config.buffer_words()),
            write_ptr_mailbox: layout.write_ptr_mailbox,
            ack_mailbox: layout.ack_mailbox,
            upstream_ack,
            routing,
            next_hops: Vec::new(),
            max_chunk_words: config.max_burst_words(),
            state: ProducerState::Idle,
            completed: VecDeque::new(),
            packets_delivered: 0,
            packets_forwarded: 0,
        }
    }

    /// Register the queue that feeds `link`.
    pub fn connect_next_hop(&mut self, link: LinkId, queue: QueueHandle) {
        if self.next_hops.len() <= link.index() {
            self.next_hops.resize(link.index() + 1, None);
        }
        self.next_hops[link.index()] = Some(queue);
    }

    /// Clear the mailboxes before the peer starts writing.
    pub fn init(&mut self, t: &mut impl Memory) {
        t.write_u32(self.write_ptr_mailbox, 0);
        t.write_u32(self.ack_mailbox, 0);
    }

    #[must_use]
    pub fn state(&self) -> ProducerState {
        self.state
    }

    #[must_use]
    pub fn fault(&self) -> Option<ChannelFault> {
        match self.state {
            ProducerState::Corrupted { fault } => Some(fault),
            _ => None,
        }
    }

    #[must_use]
    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    #[must_use]
    pub fn packets_delivered(&self) -> u64 {
        self.packets_delivered
    }

    #[must_use]
    pub fn packets_forwarded(&self) -> u64 {
        self.packets_forwarded
    }

    /// Local writes that asked for a response since the last call.
    pub fn take_completed(&mut self) -> Vec<PacketHeader> {
        self.completed.drain(..).collect()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == ProducerState::Idle && self.ring.is_empty()
    }

    /// Run [`Producer::packet_ready`] and [`Producer::process_packet`] once.
    /// Returns true if anything moved.
    pub fn step(&mut self, t: &mut impl Transport) -> bool {
        let started = self.packet_ready(t);
        self.process_packet(t) || started
    }

    /// Pick up the write pointer published by the peer and start the next
    /// packet once its whole header is resident.
    ///
    /// Returns true if a packet was started.
    pub fn packet_ready(&mut self, t: &mut impl Transport) -> bool {
        self.ring.set_write_ptr(t.read_u32(self.write_ptr_mailbox));
        match self.state {
            ProducerState::Idle | ProducerState::AwaitingHeader => {}
            _ => return false,
        }

        let occupied = self.ring.occupied_words();
        if occupied == 0 {
            self.state = ProducerState::Idle;
            return false;
        }
        if occupied < HEADER_WORDS {
            self.state = ProducerState::AwaitingHeader;
            return false;
        }
        self.advance_next_packet(t);
        true
    }

    fn advance_next_packet(&mut self, t: &mut impl Transport) {
        let mut raw = [0; HEADER_BYTES as usize];
        t.read_ring(&self.ring, self.ring.read_ptr(), &mut raw);
        let header = match PacketHeader::decode(&raw) {
            Ok(header) => header,
            Err(e) => {
                self.corrupt(e.into());
                return;
            }
        };

        let tag = create_and_track_tag!(self.entity ; "packet", header.packet_size_bytes as usize);
        enter!(self.entity ; tag);
        trace!(self.entity ; "{tag}: {header}");

        match self.routing.next_hop(header.dst_mesh_id, header.dst_device_id) {
            None => self.corrupt(ChannelFault::Unroutable {
                mesh_id: header.dst_mesh_id,
                device_id: header.dst_device_id,
            }),
            Some(Route::Local) => self.start_local(t, header, tag),
            Some(Route::Link(link)) => self.start_forward(t, header, tag, link),
        }
    }

    fn start_local(&mut self, t: &mut impl Transport, header: PacketHeader, tag: Tag) {
        match header.command {
            Command::AsyncWrite | Command::DatagramSocketWrite => {}
            command => {
                self.corrupt(ChannelFault::Unsupported(command));
                return;
            }
        }
        self.consume(t, HEADER_WORDS);
        self.state = ProducerState::Delivering {
            header,
            tag,
            target_offset: GlobalAddress(header.session_target_address).offset(),
            bytes_remaining: header.payload_bytes(),
        };
    }

    fn start_forward(&mut self, t: &mut impl Transport, header: PacketHeader, tag: Tag, link: LinkId) {
        let Some(queue) = self.next_hops.get(link.index()).copied().flatten() else {
            self.corrupt(ChannelFault::Unroutable {
                mesh_id: header.dst_mesh_id,
                device_id: header.dst_device_id,
            });
            return;
        };
        debug!(self.entity ; "{tag}: forward over {link}");

        let total_words = header.total_words();
        let available = self.ring.occupied_words().min(total_words);
        let published_ptr = self.ring.advance(self.ring.read_ptr(), available);

        let request = if header.is_inline() {
            ChannelRequest::Inline(header)
        } else {
            // The puller starts from whatever is in the ack mailbox, so make
            // sure it is not left over from the previous packet.
            t.write_u32(self.ack_mailbox, self.ring.read_ptr());
            ChannelRequest::Pull(PullRequest {
                write_ptr: published_ptr,
                read_ptr: self.ring.read_ptr(),
                size_bytes: header.packet_size_bytes,
                buffer_capacity: self.ring.capacity_words(),
                source_buffer_address: t.local_address(self.ring.base_offset()),
                ack_address: t.local_address(self.ack_mailbox),
                flags: 0,
            })
        };

        let pending = queue.begin_enqueue(t, request);
        self.state = ProducerState::AwaitingCredit {
            header,
            tag,
            pending,
            published_ptr,
            words_unpublished: total_words - available,
        };
    }

    /// Advance the packet in progress.
    ///
    /// Returns true if any data moved or the packet changed state.
    pub fn process_packet(&mut self, t: &mut impl Transport) -> bool {
        match self.state {
            ProducerState::Idle
            | ProducerState::AwaitingHeader
            | ProducerState::Corrupted { .. } => false,
            ProducerState::Delivering {
                header,
                tag,
                target_offset,
                bytes_remaining,
            } => self.deliver(t, header, tag, target_offset, bytes_remaining),
            ProducerState::AwaitingCredit {
                header,
                tag,
                pending,
                published_ptr,
                words_unpublished,
            } => {
                let Poll::Ready(write_ptr_address) = pending.poll(t) else {
                    return false;
                };
                if header.is_inline() {
                    self.consume(t, HEADER_WORDS);
                    self.finish(header, tag);
                } else {
                    self.state = ProducerState::AwaitingDrainAck {
                        header,
                        tag,
                        write_ptr_address,
                        published_ptr,
                        words_unpublished,
                        words_undrained: header.total_words(),
                    };
                }
                true
            }
            ProducerState::AwaitingDrainAck {
                header,
                tag,
                write_ptr_address,
                published_ptr,
                words_unpublished,
                words_undrained,
            } => self.follow_drain(
                t,
                header,
                tag,
                write_ptr_address,
                published_ptr,
                words_unpublished,
                words_undrained,
            ),
        }
    }

    fn deliver(
        &mut self,
        t: &mut impl Transport,
        header: PacketHeader,
        tag: Tag,
        target_offset: u32,
        bytes_remaining: u32,
    ) -> bool {
        if let PacketParams::Atomic {
            increment,
            wrap_boundary,
        } = header.params
        {
            t.local_atomic_increment(target_offset, increment, wrap_boundary);
            self.complete_local(t, header, tag);
            return true;
        }

        if bytes_remaining == 0 {
            self.complete_local(t, header, tag);
            return true;
        }

        let words = self
            .ring
            .occupied_words()
            .min(self.ring.words_before_wrap(self.ring.read_ptr()))
            .min(self.max_chunk_words)
            .min(words_for_bytes(bytes_remaining));
        if words == 0 {
            return false;
        }
        let num_bytes = (words * WORD_BYTES).min(bytes_remaining);
        let mut data = vec![0; num_bytes as usize];
        t.read_bytes(self.ring.byte_offset(self.ring.read_ptr()), &mut data);
        t.local_async_write(target_offset, &data);
        self.consume(t, words);

        let bytes_remaining = bytes_remaining - num_bytes;
        if bytes_remaining == 0 {
            self.complete_local(t, header, tag);
        } else {
            self.state = ProducerState::Delivering {
                header,
                tag,
                target_offset: target_offset + num_bytes,
                bytes_remaining,
            };
        }
        true
    }

    fn complete_local(&mut self, t: &mut impl Transport, header: PacketHeader, tag: Tag) {
        t.write_barrier();
        if header.command == Command::AsyncWrite && header.response_address != 0 {
            self.completed.push_back(header);
        }
        self.packets_delivered += 1;
        self.finish(header, tag);
    }

    #[allow(clippy::too_many_arguments)]
    fn follow_drain(
        &mut self,
        t: &mut impl Transport,
        header: PacketHeader,
        tag: Tag,
        write_ptr_address: GlobalAddress,
        mut published_ptr: u32,
        mut words_unpublished: u32,
        mut words_undrained: u32,
    ) -> bool {
        let mut progress = false;

        let arrived = self
            .ring
            .distance(published_ptr, self.ring.write_ptr())
            .min(words_unpublished);
        if arrived > 0 {
            published_ptr = self.ring.advance(published_ptr, arrived);
            words_unpublished -= arrived;
            t.remote_write(write_ptr_address, published_ptr);
            progress = true;
        }

        let acked = t.read_u32(self.ack_mailbox);
        let drained = self.ring.distance(self.ring.read_ptr(), acked);
        if drained > 0 {
            self.ring.set_read_ptr(acked);
            self.acknowledge(t);
            words_undrained -= drained;
            progress = true;
        }

        if words_undrained == 0 {
            self.packets_forwarded += 1;
            self.finish(header, tag);
        } else {
            self.state = ProducerState::AwaitingDrainAck {
                header,
                tag,
                write_ptr_address,
                published_ptr,
                words_unpublished,
                words_undrained,
            };
        }
        progress
    }

    fn consume(&mut self, t: &mut impl Transport, num_words: u32) {
        self.ring.advance_read(num_words);
        self.acknowledge(t);
    }

    /// Tell the upstream consumer how far the buffer has been freed.
    fn acknowledge(&self, t: &mut impl Transport) {
        t.remote_write(self.upstream_ack, self.ring.read_ptr());
    }

    fn finish(&mut self, header: PacketHeader, tag: Tag) {
        trace!(self.entity ; "{tag}: done {:?}", header.command);
        exit!(self.entity ; tag);
        destroy_tag!(self.entity ; tag);
        self.state = ProducerState::Idle;
    }

    fn corrupt(&mut self, fault: ChannelFault) {
        error!(self.entity ; "{fault}");
        self.state = ProducerState::Corrupted { fault };
    }
}
