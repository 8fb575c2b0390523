// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Virtual channels.
//!
//! A link carries a data virtual channel in each direction. The sending side
//! of the link is a [`Consumer`](consumer::Consumer): it consumes pull
//! requests, pulls the data into its buffer and forwards it over the link.
//! The receiving side is a [`Producer`](producer::Producer): it parses the
//! packets arriving in its buffer and produces either a local delivery or a
//! pull request for the next hop.
//!
//! Flow control is by credit. Each side publishes its pointers to the other:
//! the consumer sends its write pointer over the link after every burst and
//! the producer writes its read pointer back whenever it frees space.

pub mod consumer;
pub mod producer;
pub mod socket_reader;

use std::fmt;

use fabric_engine::types::SimError;

use crate::memory::MemoryAllocator;
use crate::packet::{Command, HeaderError};
use crate::pull_request::queue_bytes;
use crate::types::{LinkId, WORD_BYTES};

/// Configuration shared by the data channels of a link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Words in each channel buffer.
    buffer_words: u32,

    /// Most words forwarded over the link by one call.
    max_burst_words: u32,

    /// Words pulled after which the write pointer is synchronised even if
    /// the packet is not complete.
    sync_threshold_words: u32,

    /// Write-pointer snapshots a consumer can hold before it has to forward.
    sync_buffer_entries: u32,

    /// Slots in each pull request queue (a power of two).
    queue_slots: u32,
}

impl ChannelConfig {
    /// # Panics
    ///
    /// If a size is zero or `queue_slots` is not a power of two.
    #[must_use]
    pub fn new(
        buffer_words: u32,
        max_burst_words: u32,
        sync_threshold_words: u32,
        sync_buffer_entries: u32,
        queue_slots: u32,
    ) -> Self {
        assert!(buffer_words > 0 && max_burst_words > 0 && sync_buffer_entries > 0);
        assert!(sync_threshold_words > 0);
        assert!(
            queue_slots.is_power_of_two(),
            "queue slots must be a power of two, not {queue_slots}"
        );
        Self {
            buffer_words,
            max_burst_words,
            // A threshold above the buffer size would leave a full buffer
            // with nothing synchronised to forward.
            sync_threshold_words: sync_threshold_words.min(buffer_words),
            sync_buffer_entries,
            queue_slots,
        }
    }

    #[must_use]
    pub fn buffer_words(&self) -> u32 {
        self.buffer_words
    }

    #[must_use]
    pub fn max_burst_words(&self) -> u32 {
        self.max_burst_words
    }

    #[must_use]
    pub fn sync_threshold_words(&self) -> u32 {
        self.sync_threshold_words
    }

    #[must_use]
    pub fn sync_buffer_entries(&self) -> u32 {
        self.sync_buffer_entries
    }

    #[must_use]
    pub fn queue_slots(&self) -> u32 {
        self.queue_slots
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new(1024, 256, 64, 4, 16)
    }
}

/// Why a channel stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelFault {
    Header(HeaderError),
    /// No route to the destination.
    Unroutable { mesh_id: u16, device_id: u16 },
    /// A command that cannot be delivered on this channel.
    Unsupported(Command),
}

impl fmt::Display for ChannelFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelFault::Header(e) => write!(f, "corrupt header: {e}"),
            ChannelFault::Unroutable { mesh_id, device_id } => {
                write!(f, "no route to {mesh_id}/{device_id}")
            }
            ChannelFault::Unsupported(command) => write!(f, "unsupported command {command:?}"),
        }
    }
}

impl From<HeaderError> for ChannelFault {
    fn from(e: HeaderError) -> Self {
        ChannelFault::Header(e)
    }
}

/// Local memory used by a [`Consumer`](consumer::Consumer).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsumerLayout {
    pub queue_offset: u32,
    pub buffer_offset: u32,
    /// Written by the peer producer with its read pointer.
    pub read_ptr_mailbox: u32,
    /// Staging word for the pointer sync sent over the link.
    pub sync_scratch: u32,
}

impl ConsumerLayout {
    pub fn allocate(alloc: &mut MemoryAllocator, config: &ChannelConfig) -> Result<Self, SimError> {
        Ok(Self {
            queue_offset: alloc.alloc_words(queue_bytes(config.queue_slots()) / WORD_BYTES)?,
            buffer_offset: alloc.alloc_words(config.buffer_words())?,
            read_ptr_mailbox: alloc.alloc_words(1)?,
            sync_scratch: alloc.alloc_words(1)?,
        })
    }
}

/// Local memory used by a [`Producer`](producer::Producer).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProducerLayout {
    pub buffer_offset: u32,
    /// Written over the link by the peer consumer with its write pointer.
    pub write_ptr_mailbox: u32,
    /// Written by whoever pulls from this buffer with their read pointer.
    pub ack_mailbox: u32,
}

impl ProducerLayout {
    pub fn allocate(alloc: &mut MemoryAllocator, config: &ChannelConfig) -> Result<Self, SimError> {
        Ok(Self {
            buffer_offset: alloc.alloc_words(config.buffer_words())?,
            write_ptr_mailbox: alloc.alloc_words(1)?,
            ack_mailbox: alloc.alloc_words(1)?,
        })
    }
}

/// The producer buffer at the far end of a link, as seen by the consumer
/// that feeds it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerBuffer {
    pub link: LinkId,
    pub buffer_offset: u32,
    pub capacity_words: u32,
    pub write_ptr_mailbox: u32,
}

impl PeerBuffer {
    #[must_use]
    pub fn new(link: LinkId, layout: &ProducerLayout, config: &ChannelConfig) -> Self {
        Self {
            link,
            buffer_offset: layout.buffer_offset,
            capacity_words: config.buffer_words(),
            write_ptr_mailbox: layout.write_ptr_mailbox,
        }
    }
}
