// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Control channels.
//!
//! Control messages are header-only packets (socket commands and write
//! responses). They travel on their own channel in each direction of a link
//! so they are never stuck behind bulk data.
//!
//! The outbound side keeps a ring of message slots with a validity flag per
//! slot. Each message crosses the link as one fixed-size transfer followed by
//! a pointer-sync word. The inbound side acknowledges every message it takes
//! by writing its read pointer back to the outbound side.

use std::rc::Rc;
use std::sync::Arc;

use fabric_engine::types::SimError;
use fabric_track::entity::Entity;
use fabric_track::{debug, error, trace, warn};

use crate::channel::ChannelFault;
use crate::memory::MemoryAllocator;
use crate::packet::{Command, PacketHeader};
use crate::ring_buffer::RingBuffer;
use crate::routing::{Route, RoutingTable};
use crate::transport::{Memory, Transport};
use crate::types::{GlobalAddress, HEADER_BYTES, HEADER_WORDS, LinkId};

const SLOT_VALID: u32 = 1;

/// Receives the socket control messages addressed to this node.
pub trait SessionManager {
    fn handle(&mut self, message: &PacketHeader);
}

/// Local memory of a [`ControlOutbound`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlOutboundLayout {
    pub slots_offset: u32,
    /// One word per slot.
    pub flags_offset: u32,
    /// Written by the peer inbound side with its read pointer.
    pub read_ptr_mailbox: u32,
    pub sync_scratch: u32,
}

impl ControlOutboundLayout {
    pub fn allocate(alloc: &mut MemoryAllocator, num_slots: u32) -> Result<Self, SimError> {
        Ok(Self {
            slots_offset: alloc.alloc_words(num_slots * HEADER_WORDS)?,
            flags_offset: alloc.alloc_words(num_slots)?,
            read_ptr_mailbox: alloc.alloc_words(1)?,
            sync_scratch: alloc.alloc_words(1)?,
        })
    }
}

/// Local memory of a [`ControlInbound`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlInboundLayout {
    pub slots_offset: u32,
    /// Written over the link by the peer outbound side.
    pub write_ptr_mailbox: u32,
}

impl ControlInboundLayout {
    pub fn allocate(alloc: &mut MemoryAllocator, num_slots: u32) -> Result<Self, SimError> {
        Ok(Self {
            slots_offset: alloc.alloc_words(num_slots * HEADER_WORDS)?,
            write_ptr_mailbox: alloc.alloc_words(1)?,
        })
    }
}

fn slot_offset(ring: &RingBuffer, ptr: u32) -> u32 {
    ring.base_offset() + ring.index(ptr) * HEADER_BYTES
}

pub struct ControlOutbound {
    pub entity: Arc<Entity>,
    link: LinkId,

    /// Messages waiting to be sent, one entry per slot.
    local: RingBuffer,
    flags_offset: u32,
    read_ptr_mailbox: u32,
    sync_scratch: u32,

    /// The peer's inbound slots.
    remote: RingBuffer,
    peer_write_ptr_mailbox: u32,

    messages_sent: u64,
}

impl ControlOutbound {
    #[must_use]
    pub fn new(
        parent: &Arc<Entity>,
        link: LinkId,
        layout: &ControlOutboundLayout,
        peer: &ControlInboundLayout,
        num_slots: u32,
    ) -> Self {
        Self {
            entity: Arc::new(Entity::new(parent, "control_out")),
            link,
            local: RingBuffer::new(layout.slots_offset, num_slots),
            flags_offset: layout.flags_offset,
            read_ptr_mailbox: layout.read_ptr_mailbox,
            sync_scratch: layout.sync_scratch,
            remote: RingBuffer::new(peer.slots_offset, num_slots),
            peer_write_ptr_mailbox: peer.write_ptr_mailbox,
            messages_sent: 0,
        }
    }

    pub fn init(&mut self, t: &mut impl Memory) {
        for i in 0..self.local.capacity_words() {
            t.write_u32(self.flag_offset(i), 0);
        }
        t.write_u32(self.read_ptr_mailbox, 0);
    }

    fn flag_offset(&self, ptr: u32) -> u32 {
        self.flags_offset + self.local.byte_offset(ptr) - self.local.base_offset()
    }

    #[must_use]
    pub fn link(&self) -> LinkId {
        self.link
    }

    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }

    /// Place `message` in the next free slot. Returns false if every slot is
    /// still waiting to be sent.
    pub fn try_send(&mut self, t: &mut impl Transport, message: &PacketHeader) -> bool {
        if self.local.is_full() {
            return false;
        }
        let ptr = self.local.write_ptr();
        t.write_bytes(slot_offset(&self.local, ptr), &message.encode());
        t.write_u32(self.flag_offset(ptr), SLOT_VALID);
        self.local.advance_write(1);
        trace!(self.entity ; "queued {message}");
        true
    }

    /// Send every valid slot the peer has room for. Returns the number of
    /// messages sent.
    pub fn forward(&mut self, t: &mut impl Transport) -> u32 {
        self.remote.set_read_ptr(t.read_u32(self.read_ptr_mailbox));

        let mut sent = 0;
        while !self.local.is_empty() && !self.remote.is_full() {
            let ptr = self.local.read_ptr();
            if t.read_u32(self.flag_offset(ptr)) != SLOT_VALID {
                break;
            }
            t.link_send(
                self.link,
                slot_offset(&self.local, ptr),
                slot_offset(&self.remote, self.remote.write_ptr()),
                HEADER_WORDS,
            );
            self.remote.advance_write(1);
            t.write_u32(self.sync_scratch, self.remote.write_ptr());
            t.link_send(self.link, self.sync_scratch, self.peer_write_ptr_mailbox, 1);

            t.write_u32(self.flag_offset(ptr), 0);
            self.local.advance_read(1);
            sent += 1;
        }
        self.messages_sent += u64::from(sent);
        sent
    }
}

pub struct ControlInbound {
    pub entity: Arc<Entity>,
    ring: RingBuffer,
    write_ptr_mailbox: u32,

    /// The peer outbound side's read pointer mailbox.
    upstream_ack: GlobalAddress,
    routing: Rc<RoutingTable>,
    fault: Option<ChannelFault>,

    messages_handled: u64,
}

impl ControlInbound {
    #[must_use]
    pub fn new(
        parent: &Arc<Entity>,
        layout: &ControlInboundLayout,
        num_slots: u32,
        upstream_ack: GlobalAddress,
        routing: Rc<RoutingTable>,
    ) -> Self {
        Self {
            entity: Arc::new(Entity::new(parent, "control_in")),
            ring: RingBuffer::new(layout.slots_offset, num_slots),
            write_ptr_mailbox: layout.write_ptr_mailbox,
            upstream_ack,
            routing,
            fault: None,
            messages_handled: 0,
        }
    }

    pub fn init(&mut self, t: &mut impl Memory) {
        t.write_u32(self.write_ptr_mailbox, 0);
    }

    #[must_use]
    pub fn fault(&self) -> Option<ChannelFault> {
        self.fault
    }

    #[must_use]
    pub fn messages_handled(&self) -> u64 {
        self.messages_handled
    }

    /// Handle the messages published by the peer.
    ///
    /// Messages for another node are passed to the outbound channel of the
    /// next hop, indexed by link. A full outbound channel stalls the inbound
    /// one until the next call. Returns the number of messages taken.
    pub fn process<T: Transport>(
        &mut self,
        t: &mut T,
        sessions: &mut dyn SessionManager,
        outbound: &mut [Option<ControlOutbound>],
    ) -> u32 {
        if self.fault.is_some() {
            return 0;
        }
        self.ring.set_write_ptr(t.read_u32(self.write_ptr_mailbox));

        let mut handled = 0;
        while !self.ring.is_empty() {
            let mut raw = [0; HEADER_BYTES as usize];
            t.read_bytes(slot_offset(&self.ring, self.ring.read_ptr()), &mut raw);
            let message = match PacketHeader::decode(&raw) {
                Ok(message) => message,
                Err(e) => {
                    self.corrupt(e.into());
                    break;
                }
            };

            match self.routing.next_hop(message.dst_mesh_id, message.dst_device_id) {
                Some(Route::Local) => self.deliver(t, sessions, &message),
                Some(Route::Link(link)) => {
                    let Some(next) = outbound.get_mut(link.index()).and_then(Option::as_mut)
                    else {
                        self.corrupt(ChannelFault::Unroutable {
                            mesh_id: message.dst_mesh_id,
                            device_id: message.dst_device_id,
                        });
                        break;
                    };
                    if !next.try_send(t, &message) {
                        break;
                    }
                }
                None => {
                    self.corrupt(ChannelFault::Unroutable {
                        mesh_id: message.dst_mesh_id,
                        device_id: message.dst_device_id,
                    });
                    break;
                }
            }

            self.ring.advance_read(1);
            t.remote_write(self.upstream_ack, self.ring.read_ptr());
            handled += 1;
        }
        self.messages_handled += u64::from(handled);
        handled
    }

    fn deliver(&self, t: &mut impl Transport, sessions: &mut dyn SessionManager, message: &PacketHeader) {
        match message.command {
            command if command.is_socket_control() => {
                debug!(self.entity ; "{message}");
                sessions.handle(message);
            }
            Command::AsyncWriteResponse => {
                let counter = GlobalAddress(message.session_target_address);
                trace!(self.entity ; "response for {counter}");
                t.remote_fetch_add(counter, -1);
            }
            _ => {
                warn!(self.entity ; "dropping {message}");
            }
        }
    }

    fn corrupt(&mut self, fault: ChannelFault) {
        error!(self.entity ; "{fault}");
        self.fault = Some(fault);
    }
}
