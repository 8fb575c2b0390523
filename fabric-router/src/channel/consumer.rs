// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The sending side of a link.
//!
//! The consumer drains its [`PullRequestQueue`], pulling packet data from
//! wherever the requests point into its own buffer, and forwards that data
//! over the link into the peer's producer buffer.
//!
//! Data is only forwarded once its write pointer has been synchronised: a
//! snapshot of the write pointer is taken each time a packet has been pulled
//! completely or the sync threshold is reached. Snapshots wait in a small
//! FIFO until the data they cover has been forwarded.

use std::collections::VecDeque;
use std::sync::Arc;

use fabric_track::entity::Entity;
use fabric_track::{debug, error, trace};

use crate::channel::{ChannelConfig, ChannelFault, ConsumerLayout, PeerBuffer};
use crate::pull_request::{ChannelRequest, PullRequestQueue, QueueHandle};
use crate::ring_buffer::RingBuffer;
use crate::transport::{Memory, Transport};
use crate::types::{GlobalAddress, HEADER_WORDS, LinkId};

pub struct Consumer {
    pub entity: Arc<Entity>,
    queue: PullRequestQueue,

    /// Local buffer. Written by pulls, read by forwards.
    ring: RingBuffer,

    /// Mirror of the peer buffer. Written by forwards, read pointer taken
    /// from the peer's acknowledgements.
    remote: RingBuffer,

    link: LinkId,
    peer_write_ptr_mailbox: u32,
    read_ptr_mailbox: u32,
    sync_scratch: u32,

    sync_buffer: VecDeque<u32>,
    sync_buffer_entries: usize,
    sync_pending: bool,
    sync_threshold_words: u32,
    words_since_last_sync: u32,

    /// Request being pulled, with the pointers advanced so far.
    active: Option<crate::pull_request::PullRequest>,
    packet_words_remaining: u32,
    max_burst_words: u32,

    fault: Option<ChannelFault>,

    words_pulled: u64,
    words_forwarded: u64,
    productive_forwards: u64,
    requests_completed: u64,
}

impl Consumer {
    #[must_use]
    pub fn new(
        parent: &Arc<Entity>,
        name: &str,
        layout: &ConsumerLayout,
        peer: &PeerBuffer,
        config: &ChannelConfig,
    ) -> Self {
        Self {
            entity: Arc::new(Entity::new(parent, name)),
            queue: PullRequestQueue::new(layout.queue_offset, config.queue_slots()),
            ring: RingBuffer::new(layout.buffer_offset, config.buffer_words()),
            remote: RingBuffer::new(peer.buffer_offset, peer.capacity_words),
            link: peer.link,
            peer_write_ptr_mailbox: peer.write_ptr_mailbox,
            read_ptr_mailbox: layout.read_ptr_mailbox,
            sync_scratch: layout.sync_scratch,
            sync_buffer: VecDeque::with_capacity(config.sync_buffer_entries() as usize),
            sync_buffer_entries: config.sync_buffer_entries() as usize,
            sync_pending: false,
            sync_threshold_words: config.sync_threshold_words(),
            words_since_last_sync: 0,
            active: None,
            packet_words_remaining: 0,
            max_burst_words: config.max_burst_words(),
            fault: None,
            words_pulled: 0,
            words_forwarded: 0,
            productive_forwards: 0,
            requests_completed: 0,
        }
    }

    /// Clear the queue and the acknowledgement mailbox.
    pub fn init(&mut self, t: &mut impl Memory) {
        self.queue.init(t);
        t.write_u32(self.read_ptr_mailbox, 0);
    }

    /// The handle senders use to enqueue requests for this link.
    pub fn queue_handle(&self, t: &impl Transport) -> QueueHandle {
        self.queue.handle(t)
    }

    #[must_use]
    pub fn link(&self) -> LinkId {
        self.link
    }

    #[must_use]
    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    #[must_use]
    pub fn fault(&self) -> Option<ChannelFault> {
        self.fault
    }

    /// Snapshots waiting to be forwarded.
    #[must_use]
    pub fn pending_syncs(&self) -> usize {
        self.sync_buffer.len()
    }

    #[must_use]
    pub fn words_pulled(&self) -> u64 {
        self.words_pulled
    }

    #[must_use]
    pub fn words_forwarded(&self) -> u64 {
        self.words_forwarded
    }

    /// Calls to [`Consumer::forward`] that moved at least one word.
    #[must_use]
    pub fn productive_forwards(&self) -> u64 {
        self.productive_forwards
    }

    #[must_use]
    pub fn requests_completed(&self) -> u64 {
        self.requests_completed
    }

    /// True when there is nothing queued, pulled or waiting to be forwarded.
    pub fn is_idle(&self, t: &impl Memory) -> bool {
        self.active.is_none() && self.ring.is_empty() && self.queue.occupied(t) == 0
    }

    /// Pull data for the request at the head of the queue into the buffer.
    ///
    /// Returns the number of words pulled. Zero means there was nothing to
    /// pull or no room to pull it into.
    pub fn pull_data(&mut self, t: &mut impl Transport) -> u32 {
        if self.fault.is_some() {
            return 0;
        }

        if self.active.is_none() {
            match self.queue.peek(t) {
                None => return 0,
                Some(Err(e)) => {
                    error!(self.entity ; "inline request: {e}");
                    self.fault = Some(e.into());
                    return 0;
                }
                Some(Ok(ChannelRequest::Inline(header))) => {
                    if self.ring.free_words() < HEADER_WORDS {
                        return 0;
                    }
                    trace!(self.entity ; "inline {header}");
                    t.write_ring(&self.ring, self.ring.write_ptr(), &header.encode());
                    self.packet_words_remaining = HEADER_WORDS;
                    self.register_pulled(HEADER_WORDS);
                    self.complete_request(t);
                    return HEADER_WORDS;
                }
                Some(Ok(ChannelRequest::Pull(request))) => {
                    trace!(self.entity ; "pull {} bytes from {}", request.size_bytes, request.source_buffer_address);
                    self.packet_words_remaining = request.size_words();
                    self.active = Some(request);
                }
            }
        }

        let Some(mut request) = self.active else {
            return 0;
        };
        request.write_ptr = self.queue.head_write_ptr(t);
        let mut source = request.source_ring();

        let to_pull = source
            .occupied_words()
            .min(self.packet_words_remaining)
            .min(self.ring.free_words());

        let mut pulled = 0;
        while pulled < to_pull {
            let chunk = (to_pull - pulled)
                .min(source.words_before_wrap(source.read_ptr()))
                .min(self.ring.words_before_wrap(self.ring.write_ptr()));
            let src = GlobalAddress::new(
                request.source_buffer_address.node(),
                source.byte_offset(source.read_ptr()),
            );
            t.remote_read_words(src, self.ring.byte_offset(self.ring.write_ptr()), chunk);
            source.advance_read(chunk);
            self.register_pulled(chunk);
            pulled += chunk;
        }

        if pulled > 0 {
            request.read_ptr = source.read_ptr();
            t.remote_write(request.ack_address, request.read_ptr);
        }

        if self.packet_words_remaining == 0 {
            self.active = None;
            self.complete_request(t);
        } else {
            self.active = Some(request);
        }
        pulled
    }

    fn complete_request(&mut self, t: &mut impl Transport) {
        self.queue.complete(t);
        self.requests_completed += 1;
    }

    /// Account for `num_words` written into the buffer.
    pub fn register_pulled(&mut self, num_words: u32) {
        self.ring.advance_write(num_words);
        self.words_pulled += u64::from(num_words);
        self.words_since_last_sync += num_words;
        self.packet_words_remaining = self.packet_words_remaining.saturating_sub(num_words);

        if self.packet_words_remaining == 0
            || self.words_since_last_sync >= self.sync_threshold_words
        {
            self.sync_pending = true;
        }
        self.flush_sync();
    }

    fn flush_sync(&mut self) {
        if self.sync_pending && self.sync_buffer.len() < self.sync_buffer_entries {
            self.sync_buffer.push_back(self.ring.write_ptr());
            self.words_since_last_sync = 0;
            self.sync_pending = false;
        }
    }

    /// Forward synchronised data over the link.
    ///
    /// Sends at most `max_burst_words`, never more than the peer has room
    /// for, split where either buffer wraps. A pointer-sync word follows the
    /// data. Returns the number of words forwarded; zero is not an error.
    pub fn forward(&mut self, t: &mut impl Transport) -> u32 {
        if self.fault.is_some() {
            return 0;
        }
        self.flush_sync();

        let Some(&newest) = self.sync_buffer.back() else {
            return 0;
        };
        let synced = self.ring.distance(self.ring.read_ptr(), newest);

        self.remote.set_read_ptr(t.read_u32(self.read_ptr_mailbox));
        let to_send = synced
            .min(self.remote.free_words())
            .min(self.max_burst_words);
        if to_send == 0 {
            return 0;
        }

        let start = self.ring.read_ptr();
        let mut sent = 0;
        while sent < to_send {
            let chunk = (to_send - sent)
                .min(self.ring.words_before_wrap(self.ring.read_ptr()))
                .min(self.remote.words_before_wrap(self.remote.write_ptr()));
            t.link_send(
                self.link,
                self.ring.byte_offset(self.ring.read_ptr()),
                self.remote.byte_offset(self.remote.write_ptr()),
                chunk,
            );
            self.ring.advance_read(chunk);
            self.remote.advance_write(chunk);
            sent += chunk;
        }

        while let Some(&snapshot) = self.sync_buffer.front() {
            if self.ring.distance(start, snapshot) > to_send {
                break;
            }
            self.sync_buffer.pop_front();
        }

        self.send_pointer_sync(t);
        self.words_forwarded += u64::from(to_send);
        self.productive_forwards += 1;
        debug!(self.entity ; "forwarded {to_send} words over {}", self.link);
        to_send
    }

    fn send_pointer_sync(&mut self, t: &mut impl Transport) {
        t.write_u32(self.sync_scratch, self.remote.write_ptr());
        t.link_send(self.link, self.sync_scratch, self.peer_write_ptr_mailbox, 1);
    }
}
