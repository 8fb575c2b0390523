// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Identifiers, addresses and sizes shared by all channels.

use std::fmt;

/// Size of the unit of transfer over a link.
pub const WORD_BYTES: u32 = 16;

/// Number of words taken by a [`PacketHeader`](crate::packet::PacketHeader).
pub const HEADER_WORDS: u32 = 3;

/// Size of a [`PacketHeader`](crate::packet::PacketHeader) on the wire.
pub const HEADER_BYTES: u32 = HEADER_WORDS * WORD_BYTES;

/// Number of words needed to hold `num_bytes`.
#[must_use]
pub fn words_for_bytes(num_bytes: u32) -> u32 {
    num_bytes.div_ceil(WORD_BYTES)
}

/// Index of a node (device) within a [`SystemMemory`](crate::memory::SystemMemory).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// Index of a point-to-point link leaving a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u8);

impl LinkId {
    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link{}", self.0)
    }
}

/// Byte address in the memory of any node: `(node << 32) | offset`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct GlobalAddress(pub u64);

impl GlobalAddress {
    #[must_use]
    pub fn new(node: NodeId, offset: u32) -> Self {
        Self((u64::from(node.0) << 32) | u64::from(offset))
    }

    #[must_use]
    pub fn node(self) -> NodeId {
        NodeId((self.0 >> 32) as u32)
    }

    #[must_use]
    pub fn offset(self) -> u32 {
        self.0 as u32
    }

    /// The address `num_bytes` further on in the same node.
    #[must_use]
    pub fn add(self, num_bytes: u32) -> Self {
        Self::new(self.node(), self.offset() + num_bytes)
    }
}

impl fmt::Display for GlobalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#x}", self.node(), self.offset())
    }
}
