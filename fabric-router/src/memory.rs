// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! In-process memory and links for a whole system of nodes.
//!
//! Every node gets a flat byte array. Links are point-to-point and copy
//! immediately, so ordering on a link is the order of the calls. Each node
//! accesses the system through its own [`NodePort`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use fabric_engine::clock::Clock;
use fabric_engine::types::SimError;
use fabric_track::entity::Entity;
use fabric_track::trace;

use crate::transport::{Memory, Transport};
use crate::types::{GlobalAddress, LinkId, NodeId, WORD_BYTES};

pub struct SystemMemory {
    pub entity: Arc<Entity>,
    clock: Clock,
    nodes: RefCell<Vec<Vec<u8>>>,
    links: RefCell<Vec<Vec<Option<NodeId>>>>,
    link_words: Cell<u64>,
}

impl SystemMemory {
    #[must_use]
    pub fn new(parent: &Arc<Entity>, clock: Clock, num_nodes: u32, bytes_per_node: u32) -> Rc<Self> {
        Rc::new(Self {
            entity: Arc::new(Entity::new(parent, "memory")),
            clock,
            nodes: RefCell::new(vec![vec![0; bytes_per_node as usize]; num_nodes as usize]),
            links: RefCell::new(vec![Vec::new(); num_nodes as usize]),
            link_words: Cell::new(0),
        })
    }

    #[must_use]
    pub fn num_nodes(&self) -> u32 {
        self.nodes.borrow().len() as u32
    }

    /// Connect `a_link` of node `a` to `b_link` of node `b` in both
    /// directions.
    pub fn connect(&self, a: NodeId, a_link: LinkId, b: NodeId, b_link: LinkId) {
        let mut links = self.links.borrow_mut();
        for (node, link, peer) in [(a, a_link, b), (b, b_link, a)] {
            let node_links = &mut links[node.0 as usize];
            if node_links.len() <= link.index() {
                node_links.resize(link.index() + 1, None);
            }
            node_links[link.index()] = Some(peer);
        }
    }

    /// The node at the other end of `link`.
    #[must_use]
    pub fn peer(&self, node: NodeId, link: LinkId) -> Option<NodeId> {
        self.links
            .borrow()
            .get(node.0 as usize)
            .and_then(|l| l.get(link.index()).copied().flatten())
    }

    /// Access to the system as seen from `node`.
    #[must_use]
    pub fn port(self: &Rc<Self>, node: NodeId) -> NodePort {
        assert!(node.0 < self.num_nodes(), "{}: no {node}", self.entity);
        NodePort {
            node,
            system: self.clone(),
        }
    }

    pub fn read(&self, address: GlobalAddress, buf: &mut [u8]) {
        let nodes = self.nodes.borrow();
        let start = address.offset() as usize;
        buf.copy_from_slice(&nodes[address.node().0 as usize][start..start + buf.len()]);
    }

    pub fn write(&self, address: GlobalAddress, data: &[u8]) {
        let mut nodes = self.nodes.borrow_mut();
        let start = address.offset() as usize;
        nodes[address.node().0 as usize][start..start + data.len()].copy_from_slice(data);
    }

    #[must_use]
    pub fn read_u32(&self, address: GlobalAddress) -> u32 {
        let mut raw = [0; 4];
        self.read(address, &mut raw);
        u32::from_le_bytes(raw)
    }

    pub fn write_u32(&self, address: GlobalAddress, value: u32) {
        self.write(address, &value.to_le_bytes());
    }

    fn copy(&self, src: GlobalAddress, dst: GlobalAddress, num_bytes: usize) {
        let mut buf = vec![0; num_bytes];
        self.read(src, &mut buf);
        self.write(dst, &buf);
    }

    /// Total words carried by all links.
    #[must_use]
    pub fn link_words(&self) -> u64 {
        self.link_words.get()
    }

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }
}

/// One node's view of a [`SystemMemory`].
#[derive(Clone)]
pub struct NodePort {
    node: NodeId,
    system: Rc<SystemMemory>,
}

impl NodePort {
    #[must_use]
    pub fn system(&self) -> &Rc<SystemMemory> {
        &self.system
    }
}

impl Memory for NodePort {
    fn read_bytes(&self, offset: u32, buf: &mut [u8]) {
        self.system.read(GlobalAddress::new(self.node, offset), buf);
    }

    fn write_bytes(&mut self, offset: u32, data: &[u8]) {
        self.system.write(GlobalAddress::new(self.node, offset), data);
    }
}

impl Transport for NodePort {
    fn node(&self) -> NodeId {
        self.node
    }

    fn link_send(&mut self, link: LinkId, src_offset: u32, dst_offset: u32, num_words: u32) {
        let Some(peer) = self.system.peer(self.node, link) else {
            panic!("{}: {} has no {link}", self.system.entity, self.node);
        };
        trace!(self.system.entity ; "{} {link} -> {peer}: {num_words} words {src_offset:#x} -> {dst_offset:#x}", self.node);
        self.system.copy(
            GlobalAddress::new(self.node, src_offset),
            GlobalAddress::new(peer, dst_offset),
            (num_words * WORD_BYTES) as usize,
        );
        self.system
            .link_words
            .set(self.system.link_words.get() + u64::from(num_words));
    }

    fn remote_fetch_add(&mut self, address: GlobalAddress, delta: i32) -> u32 {
        let old = self.system.read_u32(address);
        self.system.write_u32(address, old.wrapping_add_signed(delta));
        old
    }

    fn remote_write(&mut self, address: GlobalAddress, value: u32) {
        self.system.write_u32(address, value);
    }

    fn remote_read(&self, address: GlobalAddress) -> u32 {
        self.system.read_u32(address)
    }

    fn remote_read_words(&mut self, src: GlobalAddress, dst_offset: u32, num_words: u32) {
        self.system.copy(
            src,
            GlobalAddress::new(self.node, dst_offset),
            (num_words * WORD_BYTES) as usize,
        );
    }

    fn remote_write_words(&mut self, src_offset: u32, dst: GlobalAddress, num_words: u32) {
        self.system.copy(
            GlobalAddress::new(self.node, src_offset),
            dst,
            (num_words * WORD_BYTES) as usize,
        );
    }

    fn read_wall_clock(&self) -> u64 {
        self.system.clock.now()
    }
}

/// Hands out word-aligned regions of one node's memory.
#[derive(Clone, Debug)]
pub struct MemoryAllocator {
    next: u32,
    limit: u32,
}

impl MemoryAllocator {
    #[must_use]
    pub fn new(start: u32, limit: u32) -> Self {
        Self {
            next: start.next_multiple_of(WORD_BYTES),
            limit,
        }
    }

    /// Reserve `num_words` and return the byte offset of the region.
    pub fn alloc_words(&mut self, num_words: u32) -> Result<u32, SimError> {
        let offset = self.next;
        let end = num_words
            .checked_mul(WORD_BYTES)
            .and_then(|bytes| offset.checked_add(bytes));
        match end {
            Some(end) if end <= self.limit => {
                self.next = end;
                Ok(offset)
            }
            _ => Err(SimError(format!(
                "out of memory allocating {num_words} words at {offset:#x} (limit {:#x})",
                self.limit
            ))),
        }
    }

    /// First unallocated byte.
    #[must_use]
    pub fn next_free(&self) -> u32 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use fabric_engine::test_helpers::start_test;

    use super::*;

    #[test]
    fn links_copy_to_peer() {
        let engine = start_test(file!());
        let system = SystemMemory::new(engine.top(), engine.clock(), 2, 1024);
        system.connect(NodeId(0), LinkId(2), NodeId(1), LinkId(0));

        let mut port0 = system.port(NodeId(0));
        port0.write_bytes(0x20, &[7; 32]);
        port0.link_send(LinkId(2), 0x20, 0x100, 2);

        let mut received = [0; 32];
        system.port(NodeId(1)).read_bytes(0x100, &mut received);
        assert_eq!(received, [7; 32]);
        assert_eq!(system.link_words(), 2);
        assert_eq!(system.peer(NodeId(1), LinkId(0)), Some(NodeId(0)));
        assert_eq!(system.peer(NodeId(1), LinkId(1)), None);
    }

    #[test]
    fn fetch_add_returns_old_value() {
        let engine = start_test(file!());
        let system = SystemMemory::new(engine.top(), engine.clock(), 2, 64);
        let counter = GlobalAddress::new(NodeId(1), 16);
        let mut port = system.port(NodeId(0));

        assert_eq!(port.remote_fetch_add(counter, 1), 0);
        assert_eq!(port.remote_fetch_add(counter, 1), 1);
        assert_eq!(port.remote_fetch_add(counter, -2), 2);
        assert_eq!(port.remote_read(counter), 0);
    }

    #[test]
    fn allocator_limits() {
        let mut alloc = MemoryAllocator::new(4, 128);
        assert_eq!(alloc.alloc_words(2).unwrap(), 16);
        assert_eq!(alloc.alloc_words(4).unwrap(), 48);
        assert!(alloc.alloc_words(5).is_err());
        assert_eq!(alloc.next_free(), 112);
    }
}
