// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

#![allow(dead_code)]

use std::rc::Rc;
use std::task::Poll;

use fabric_engine::engine::Engine;
use fabric_router::channel::consumer::Consumer;
use fabric_router::channel::producer::Producer;
use fabric_router::channel::{ChannelConfig, ConsumerLayout, PeerBuffer, ProducerLayout};
use fabric_router::memory::{MemoryAllocator, NodePort, SystemMemory};
use fabric_router::packet::{Command, PacketHeader};
use fabric_router::pull_request::{ChannelRequest, PullRequest, QueueHandle};
use fabric_router::ring_buffer::RingBuffer;
use fabric_router::routing::RoutingTable;
use fabric_router::transport::{Memory, Transport};
use fabric_router::types::{GlobalAddress, LinkId, NodeId, WORD_BYTES, words_for_bytes};

pub const NODE_BYTES: u32 = 0x10_0000;

/// A packet source in one node's memory.
pub struct Sender {
    ring: RingBuffer,
    ack_mailbox: u32,
}

impl Sender {
    pub fn new(alloc: &mut MemoryAllocator, capacity_words: u32) -> Self {
        let ack_mailbox = alloc.alloc_words(1).unwrap();
        let buffer = alloc.alloc_words(capacity_words).unwrap();
        Self {
            ring: RingBuffer::new(buffer, capacity_words),
            ack_mailbox,
        }
    }

    /// Copy raw packet bytes into the buffer and describe them with a pull
    /// request.
    pub fn stage_raw(&mut self, t: &mut NodePort, bytes: &[u8]) -> PullRequest {
        self.ring.set_read_ptr(t.read_u32(self.ack_mailbox));
        let num_words = words_for_bytes(bytes.len() as u32);
        assert!(num_words <= self.ring.free_words(), "sender buffer full");

        let mut padded = bytes.to_vec();
        padded.resize((num_words * WORD_BYTES) as usize, 0);
        let start = self.ring.write_ptr();
        t.write_ring(&self.ring, start, &padded);
        self.ring.advance_write(num_words);

        PullRequest {
            write_ptr: self.ring.write_ptr(),
            read_ptr: start,
            size_bytes: bytes.len() as u32,
            buffer_capacity: self.ring.capacity_words(),
            source_buffer_address: t.local_address(self.ring.base_offset()),
            ack_address: t.local_address(self.ack_mailbox),
            flags: 0,
        }
    }

    pub fn stage(&mut self, t: &mut NodePort, header: &PacketHeader, payload: &[u8]) -> PullRequest {
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(payload);
        self.stage_raw(t, &bytes)
    }
}

/// Enqueue a request that is expected to fit in the queue.
pub fn enqueue_now(t: &mut NodePort, queue: &QueueHandle, request: ChannelRequest) {
    let pending = queue.begin_enqueue(t, request);
    assert!(pending.poll(t).is_ready(), "queue full");
}

pub fn payload(seed: u8, num_bytes: usize) -> Vec<u8> {
    (0..num_bytes)
        .map(|i| seed.wrapping_mul(31).wrapping_add(i as u8))
        .collect()
}

/// Node 0 (device 0) sends over link 0 to node 1 (device 1), both in mesh 0.
pub struct LinkBench {
    pub system: Rc<SystemMemory>,
    pub port0: NodePort,
    pub port1: NodePort,
    pub consumer: Consumer,
    pub producer: Producer,
    pub producer_layout: ProducerLayout,
    pub queue: QueueHandle,
    pub sender: Sender,
    pub targets: MemoryAllocator,
}

impl LinkBench {
    pub fn new(engine: &Engine, config: &ChannelConfig, sender_words: u32) -> Self {
        let system = SystemMemory::new(engine.top(), engine.clock(), 2, NODE_BYTES);
        system.connect(NodeId(0), LinkId(0), NodeId(1), LinkId(0));
        let mut port0 = system.port(NodeId(0));
        let mut port1 = system.port(NodeId(1));

        let mut alloc0 = MemoryAllocator::new(0x100, NODE_BYTES);
        let mut alloc1 = MemoryAllocator::new(0x100, NODE_BYTES);
        let consumer_layout = ConsumerLayout::allocate(&mut alloc0, config).unwrap();
        let producer_layout = ProducerLayout::allocate(&mut alloc1, config).unwrap();
        let sender = Sender::new(&mut alloc0, sender_words);

        let mut consumer = Consumer::new(
            engine.top(),
            "consumer",
            &consumer_layout,
            &PeerBuffer::new(LinkId(0), &producer_layout, config),
            config,
        );
        consumer.init(&mut port0);

        let routing = Rc::new(RoutingTable::new(0, 1, 1, 4));
        let mut producer = Producer::new(
            engine.top(),
            "producer",
            &producer_layout,
            GlobalAddress::new(NodeId(0), consumer_layout.read_ptr_mailbox),
            routing,
            config,
        );
        producer.init(&mut port1);

        let queue = consumer.queue_handle(&port0);
        Self {
            system,
            port0,
            port1,
            consumer,
            producer,
            producer_layout,
            queue,
            sender,
            targets: alloc1,
        }
    }

    /// A write of `num_bytes` to fresh memory on node 1.
    pub fn write_header(&mut self, num_bytes: u32) -> (PacketHeader, u32) {
        let target = self.targets.alloc_words(words_for_bytes(num_bytes)).unwrap();
        let header = PacketHeader::new(Command::AsyncWrite, 0, 1)
            .set_src(0, 0)
            .set_target(GlobalAddress::new(NodeId(1), target).0)
            .set_payload_bytes(num_bytes);
        (header, target)
    }

    pub fn send(&mut self, header: &PacketHeader, payload: &[u8]) {
        let request = self.sender.stage(&mut self.port0, header, payload);
        enqueue_now(&mut self.port0, &self.queue, ChannelRequest::Pull(request));
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        let request = self.sender.stage_raw(&mut self.port0, bytes);
        enqueue_now(&mut self.port0, &self.queue, ChannelRequest::Pull(request));
    }

    /// One round of every channel operation. Returns true if anything moved.
    pub fn step(&mut self) -> bool {
        let pulled = self.consumer.pull_data(&mut self.port0);
        let forwarded = self.consumer.forward(&mut self.port0);
        let produced = self.producer.step(&mut self.port1);
        pulled > 0 || forwarded > 0 || produced
    }

    /// Step until nothing moves. Returns the number of productive steps.
    pub fn run(&mut self) -> usize {
        let mut steps = 0;
        while self.step() {
            steps += 1;
            assert!(steps < 100_000, "channels did not settle");
        }
        steps
    }

    pub fn read_node1(&self, offset: u32, num_bytes: usize) -> Vec<u8> {
        let mut bytes = vec![0; num_bytes];
        self.port1.read_bytes(offset, &mut bytes);
        bytes
    }
}

pub fn ready<T>(poll: Poll<T>) -> T {
    match poll {
        Poll::Ready(value) => value,
        Poll::Pending => panic!("expected Ready"),
    }
}
