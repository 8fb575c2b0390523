// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Link bring-up.
//!
//! Both ends of a link write a sentinel into the other end's mailbox. A node
//! that sees either sentinel knows its own receive path works and answers
//! with [`LINK_ACK`]. A node that sees [`LINK_ACK`] also knows the peer can
//! hear it.

use std::sync::Arc;
use std::task::Poll;

use fabric_engine::clock::Clock;
use fabric_track::entity::Entity;
use fabric_track::{debug, warn};

use crate::transport::Transport;
use crate::types::LinkId;

pub const LINK_HELLO: u32 = 0x4845_4c4f;
pub const LINK_ACK: u32 = 0x4143_4b4e;

pub struct LinkHandshake {
    pub entity: Arc<Entity>,
    link: LinkId,
    mailbox: u32,
    scratch: u32,
    peer_mailbox: u32,
    timeout_cycles: Option<u64>,
    started_at: Option<u64>,
    local_ready: bool,
    peer_ready: bool,
}

impl LinkHandshake {
    /// `mailbox` and `scratch` are local words. `peer_mailbox` is the
    /// mailbox of the handshake at the other end of `link`.
    #[must_use]
    pub fn new(
        parent: &Arc<Entity>,
        link: LinkId,
        mailbox: u32,
        scratch: u32,
        peer_mailbox: u32,
        timeout_cycles: Option<u64>,
    ) -> Self {
        Self {
            entity: Arc::new(Entity::new(parent, "handshake")),
            link,
            mailbox,
            scratch,
            peer_mailbox,
            timeout_cycles,
            started_at: None,
            local_ready: false,
            peer_ready: false,
        }
    }

    #[must_use]
    pub fn local_ready(&self) -> bool {
        self.local_ready
    }

    #[must_use]
    pub fn peer_ready(&self) -> bool {
        self.peer_ready
    }

    #[must_use]
    pub fn is_established(&self) -> bool {
        self.local_ready && self.peer_ready
    }

    /// Make one handshake attempt.
    ///
    /// Returns `Ready(true)` once both directions work and `Ready(false)` if
    /// the timeout expired first.
    pub fn poll(&mut self, t: &mut impl Transport) -> Poll<bool> {
        let now = t.read_wall_clock();
        let started_at = *self.started_at.get_or_insert(now);

        match t.read_u32(self.mailbox) {
            LINK_HELLO => self.local_ready = true,
            LINK_ACK => {
                self.local_ready = true;
                self.peer_ready = true;
            }
            _ => {}
        }

        let sentinel = if self.local_ready { LINK_ACK } else { LINK_HELLO };
        t.write_u32(self.scratch, sentinel);
        t.link_send(self.link, self.scratch, self.peer_mailbox, 1);

        if self.is_established() {
            debug!(self.entity ; "{} up after {} cycles", self.link, now - started_at);
            return Poll::Ready(true);
        }

        if let Some(timeout) = self.timeout_cycles {
            if now - started_at >= timeout {
                warn!(self.entity ; "{} timed out after {timeout} cycles", self.link);
                return Poll::Ready(false);
            }
        }
        Poll::Pending
    }

    /// Poll once per cycle until the handshake completes.
    pub async fn establish(&mut self, t: &mut impl Transport, clock: &Clock) -> bool {
        loop {
            if let Poll::Ready(established) = self.poll(t) {
                return established;
            }
            clock.wait_cycles(1).await;
        }
    }
}
