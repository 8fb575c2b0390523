// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A sender of fabric traffic on one node.
//!
//! The client stages each packet in its own ring buffer and asks the
//! consumer of the first link to pull it. A packet larger than the buffer is
//! streamed: the client keeps refilling the buffer and publishing its write
//! pointer to the queued request as the consumer drains it.
//!
//! Writes that want a response increment the client's in-flight counter;
//! the response from the destination decrements it again.

use std::sync::Arc;

use fabric_engine::clock::Clock;
use fabric_engine::sim_error;
use fabric_engine::types::{SimError, SimResult};
use fabric_router::packet::{Command, PacketHeader};
use fabric_router::pull_request::{ChannelRequest, PullRequest, QueueHandle};
use fabric_router::ring_buffer::RingBuffer;
use fabric_router::routing::Route;
use fabric_router::transport::{Memory, Transport};
use fabric_router::types::{GlobalAddress, HEADER_BYTES, WORD_BYTES};
use fabric_track::entity::Entity;
use fabric_track::{create_and_track_tag, debug, destroy_tag, enter, exit, trace};

use crate::router_node::RouterNode;

/// Payload bytes of a packet carrying `len` bytes of data.
fn payload_bytes(len: usize) -> Result<u32, SimError> {
    match u32::try_from(len) {
        Ok(num_bytes) if num_bytes <= u32::MAX - HEADER_BYTES => Ok(num_bytes),
        _ => sim_error!(format!("payload of {len} bytes does not fit in a packet")),
    }
}

pub struct FabricClient {
    pub entity: Arc<Entity>,
    node: RouterNode,
    clock: Clock,
    ring: RingBuffer,
    ack_mailbox: u32,
    in_flight_counter: u32,
    packets_sent: u64,
}

impl FabricClient {
    /// Create a client with a staging buffer of `buffer_words` on `node`.
    pub fn new(parent: &Arc<Entity>, name: &str, node: &RouterNode, buffer_words: u32) -> Result<Self, SimError> {
        let ack_mailbox = node.alloc_words(1)?;
        let in_flight_counter = node.alloc_words(1)?;
        let buffer = node.alloc_words(buffer_words)?;

        let mut port = node.port();
        port.write_u32(ack_mailbox, 0);
        port.write_u32(in_flight_counter, 0);

        Ok(Self {
            entity: Arc::new(Entity::new(parent, name)),
            node: node.clone(),
            clock: node.clock().clone(),
            ring: RingBuffer::new(buffer, buffer_words),
            ack_mailbox,
            in_flight_counter,
            packets_sent: 0,
        })
    }

    #[must_use]
    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    /// Writes still waiting for their response.
    #[must_use]
    pub fn in_flight(&self) -> u32 {
        self.node.port().read_u32(self.in_flight_counter)
    }

    /// Address of the in-flight counter.
    #[must_use]
    pub fn response_address(&self) -> GlobalAddress {
        self.node.port().local_address(self.in_flight_counter)
    }

    fn header(&self, command: Command, dst_mesh_id: u16, dst_device_id: u16) -> PacketHeader {
        PacketHeader::new(command, dst_mesh_id, dst_device_id)
            .set_src(self.node.mesh_id(), self.node.device_id())
    }

    fn first_hop(&self, header: &PacketHeader) -> Result<Option<QueueHandle>, SimError> {
        match self.node.routing().next_hop(header.dst_mesh_id, header.dst_device_id) {
            Some(Route::Local) => Ok(None),
            Some(Route::Link(link)) => match self.node.queue_handle(link) {
                Some(queue) => Ok(Some(queue)),
                None => Err(SimError(format!("{}: {} is not connected", self.entity, link))),
            },
            None => Err(SimError(format!(
                "{}: no route to {}/{}",
                self.entity, header.dst_mesh_id, header.dst_device_id
            ))),
        }
    }

    /// Write `data` to `target` on another node (or this one).
    ///
    /// Returns once the whole packet has left the client's buffer. With
    /// `with_response`, completion at the destination is reported through
    /// [`FabricClient::wait_for_responses`].
    pub async fn async_write(
        &mut self,
        dst_mesh_id: u16,
        dst_device_id: u16,
        target: GlobalAddress,
        data: &[u8],
        with_response: bool,
    ) -> SimResult {
        let mut header = self
            .header(Command::AsyncWrite, dst_mesh_id, dst_device_id)
            .set_target(target.0)
            .set_payload_bytes(payload_bytes(data.len())?);
        if with_response {
            header = header.set_response_address(self.response_address().0);
        }

        let mut port = self.node.port();
        let Some(queue) = self.first_hop(&header)? else {
            port.local_async_write(target.offset(), data);
            port.write_barrier();
            self.packets_sent += 1;
            return Ok(());
        };

        if with_response {
            port.remote_fetch_add(self.response_address(), 1);
        }

        let tag = create_and_track_tag!(self.entity ; "write", data.len());
        enter!(self.entity ; tag);
        debug!(self.entity ; "{tag}: {header}");

        let mut packet = header.encode().to_vec();
        packet.extend_from_slice(data);
        packet.resize((header.total_words() * WORD_BYTES) as usize, 0);

        self.ring.set_read_ptr(port.read_u32(self.ack_mailbox));
        let start = self.ring.write_ptr();
        let mut staged = self.stage(&mut port, &packet, 0);

        // The consumer reports progress through the ack mailbox.
        port.write_u32(self.ack_mailbox, start);
        let request = PullRequest {
            write_ptr: self.ring.write_ptr(),
            read_ptr: start,
            size_bytes: header.packet_size_bytes,
            buffer_capacity: self.ring.capacity_words(),
            source_buffer_address: port.local_address(self.ring.base_offset()),
            ack_address: port.local_address(self.ack_mailbox),
            flags: 0,
        };
        let write_ptr_address = queue
            .enqueue(&mut port, &self.clock, ChannelRequest::Pull(request))
            .await;

        loop {
            self.ring.set_read_ptr(port.read_u32(self.ack_mailbox));
            if staged < packet.len() {
                let before = staged;
                staged = self.stage(&mut port, &packet, staged);
                if staged > before {
                    port.remote_write(write_ptr_address, self.ring.write_ptr());
                    trace!(self.entity ; "{tag}: {staged} of {} bytes staged", packet.len());
                }
            } else if self.ring.is_empty() {
                break;
            }
            self.clock.wait_cycles(1).await;
        }

        exit!(self.entity ; tag);
        destroy_tag!(self.entity ; tag);
        self.packets_sent += 1;
        Ok(())
    }

    /// Copy as much of `packet` from `from` as fits. Returns the new offset.
    fn stage(&mut self, port: &mut impl Memory, packet: &[u8], from: usize) -> usize {
        let remaining_words = ((packet.len() - from) as u32) / WORD_BYTES;
        let num_words = remaining_words.min(self.ring.free_words());
        if num_words == 0 {
            return from;
        }
        let to = from + (num_words * WORD_BYTES) as usize;
        port.write_ring(&self.ring, self.ring.write_ptr(), &packet[from..to]);
        self.ring.advance_write(num_words);
        to
    }

    /// Add `increment` to the word at `target`, wrapping above bit
    /// `wrap_boundary`.
    pub async fn atomic_increment(
        &mut self,
        dst_mesh_id: u16,
        dst_device_id: u16,
        target: GlobalAddress,
        increment: u32,
        wrap_boundary: u32,
    ) -> SimResult {
        let header = self
            .header(Command::AsyncWrite, dst_mesh_id, dst_device_id)
            .set_target(target.0)
            .set_atomic(increment, wrap_boundary);

        let mut port = self.node.port();
        match self.first_hop(&header)? {
            None => {
                port.local_atomic_increment(target.offset(), increment, wrap_boundary);
            }
            Some(queue) => {
                trace!(self.entity ; "{header}");
                queue
                    .enqueue(&mut port, &self.clock, ChannelRequest::Inline(header))
                    .await;
            }
        }
        self.packets_sent += 1;
        Ok(())
    }

    /// Send a socket control message.
    pub fn send_control(&mut self, header: PacketHeader) -> SimResult {
        if !header.command.is_socket_control() {
            return sim_error!(format!("{}: {header} is not a control message", self.entity));
        }
        if let Err(e) = header.validate() {
            return sim_error!(format!("{}: invalid control message: {e}", self.entity));
        }
        self.node
            .send_control(header.set_src(self.node.mesh_id(), self.node.device_id()));
        Ok(())
    }

    /// Wait until every write sent with a response has been acknowledged.
    pub async fn wait_for_responses(&self) {
        while self.in_flight() != 0 {
            self.clock.wait_cycles(1).await;
        }
    }
}
