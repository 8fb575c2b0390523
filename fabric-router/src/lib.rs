// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Chip-to-chip routing.
//!
//! Packets move between nodes over point-to-point links. Every link carries a
//! data channel and a control channel in each direction:
//!
//!  - [`channel::consumer::Consumer`] pulls the packets queued for its link
//!    and forwards them to the peer.
//!  - [`channel::producer::Producer`] takes the packets arriving from the peer
//!    and delivers them locally or queues them for the next link.
//!  - [`control::ControlOutbound`] and [`control::ControlInbound`] carry
//!    header-only control messages.
//!
//! All channel state machines are driven by repeated calls that return the
//! amount of progress they made, and access memory only through
//! [`transport::Transport`].

pub mod channel;
pub mod control;
pub mod handshake;
pub mod memory;
pub mod packet;
pub mod pull_request;
pub mod ring_buffer;
pub mod routing;
pub mod transport;
pub mod types;
