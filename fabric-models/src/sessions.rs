// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Socket sessions of a node.
//!
//! Sockets are opened, connected and closed by control messages. A message
//! from an older epoch than the session it names is stale and ignored.

use std::collections::BTreeMap;
use std::sync::Arc;

use fabric_router::control::SessionManager;
use fabric_router::packet::{Command, PacketHeader, PacketParams, SocketParams};
use fabric_track::entity::Entity;
use fabric_track::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketState {
    Opened,
    Connected,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketSession {
    pub state: SocketState,
    pub epoch_id: u16,
    pub socket_type: u8,
    pub direction: u8,
    /// Node that sent the last accepted message.
    pub peer_mesh_id: u16,
    pub peer_device_id: u16,
}

pub struct SocketSessions {
    pub entity: Arc<Entity>,
    sessions: BTreeMap<u16, SocketSession>,
    messages_ignored: u64,
}

impl SocketSessions {
    #[must_use]
    pub fn new(parent: &Arc<Entity>) -> Self {
        Self {
            entity: Arc::new(Entity::new(parent, "sessions")),
            sessions: BTreeMap::new(),
            messages_ignored: 0,
        }
    }

    #[must_use]
    pub fn session(&self, socket_id: u16) -> Option<SocketSession> {
        self.sessions.get(&socket_id).copied()
    }

    #[must_use]
    pub fn num_sessions(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn messages_ignored(&self) -> u64 {
        self.messages_ignored
    }

    fn ignore(&mut self, message: &PacketHeader, reason: &str) {
        warn!(self.entity ; "ignoring {message}: {reason}");
        self.messages_ignored += 1;
    }

    fn transition(&mut self, message: &PacketHeader, socket: SocketParams, to: SocketState) {
        let Some(session) = self.sessions.get_mut(&socket.socket_id) else {
            self.ignore(message, "socket not open");
            return;
        };
        if socket.epoch_id != session.epoch_id {
            self.ignore(message, "stale epoch");
            return;
        }
        match (session.state, to) {
            (SocketState::Opened, SocketState::Connected)
            | (SocketState::Opened | SocketState::Connected, SocketState::Closed) => {
                session.state = to;
                session.peer_mesh_id = message.src_mesh_id;
                session.peer_device_id = message.src_device_id;
                debug!(self.entity ; "socket {} {:?}", socket.socket_id, to);
            }
            (from, to) => {
                let reason = format!("cannot go from {from:?} to {to:?}");
                self.ignore(message, &reason);
            }
        }
    }
}

impl SessionManager for SocketSessions {
    fn handle(&mut self, message: &PacketHeader) {
        let PacketParams::Socket(socket) = message.params else {
            self.ignore(message, "no socket parameters");
            return;
        };

        match message.command {
            Command::SocketOpen => {
                let stale = self
                    .sessions
                    .get(&socket.socket_id)
                    .is_some_and(|session| socket.epoch_id < session.epoch_id);
                if stale {
                    self.ignore(message, "stale epoch");
                    return;
                }
                self.sessions.insert(
                    socket.socket_id,
                    SocketSession {
                        state: SocketState::Opened,
                        epoch_id: socket.epoch_id,
                        socket_type: socket.socket_type,
                        direction: socket.direction,
                        peer_mesh_id: message.src_mesh_id,
                        peer_device_id: message.src_device_id,
                    },
                );
                debug!(self.entity ; "socket {} opened in epoch {}", socket.socket_id, socket.epoch_id);
            }
            Command::SocketConnect => self.transition(message, socket, SocketState::Connected),
            Command::SocketClose => self.transition(message, socket, SocketState::Closed),
            _ => self.ignore(message, "not a socket command"),
        }
    }
}
