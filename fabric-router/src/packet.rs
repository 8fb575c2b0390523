// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The fixed-size packet header that precedes every packet on the fabric.
//!
//! The header is 48 bytes (three words) and is encoded explicitly in
//! little-endian byte order:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0  | 4 | packet size in bytes (header included) |
//! | 4  | 2 | destination mesh |
//! | 6  | 2 | destination device |
//! | 8  | 1 | routing flags |
//! | 9  | 1 | command |
//! | 10 | 2 | source device |
//! | 12 | 2 | source mesh |
//! | 14 | 2 | checksum |
//! | 16 | 8 | session target address |
//! | 24 | 8 | atomic or socket parameters |
//! | 32 | 8 | response address |
//! | 40 | 8 | reserved |

use std::fmt;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::types::{HEADER_BYTES, words_for_bytes};

const SIZE_OFFSET: usize = 0;
const DST_MESH_OFFSET: usize = 4;
const DST_DEVICE_OFFSET: usize = 6;
const FLAGS_OFFSET: usize = 8;
const COMMAND_OFFSET: usize = 9;
const SRC_DEVICE_OFFSET: usize = 10;
const SRC_MESH_OFFSET: usize = 12;
const CHECKSUM_OFFSET: usize = 14;
const TARGET_OFFSET: usize = 16;
const PARAMS_OFFSET: usize = 24;
const RESPONSE_OFFSET: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
pub enum RoutingFlags {
    /// Payload follows the header and is pulled hop by hop.
    Forward = 1,
    /// Header-only packet carried inside the pull request itself.
    InlineForward = 2,
    /// Synchronisation packet.
    Sync = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
pub enum Command {
    AsyncWrite = 0,
    AsyncWriteResponse = 1,
    DatagramSocketWrite = 2,
    SocketOpen = 3,
    SocketConnect = 4,
    SocketClose = 5,
}

impl Command {
    #[must_use]
    pub fn is_socket_control(self) -> bool {
        matches!(
            self,
            Command::SocketOpen | Command::SocketConnect | Command::SocketClose
        )
    }
}

/// Parameters of a socket control message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SocketParams {
    pub socket_id: u16,
    pub epoch_id: u16,
    pub socket_type: u8,
    pub direction: u8,
}

/// Command-specific header parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PacketParams {
    #[default]
    None,
    /// Increment applied at the target, wrapping above bit `wrap_boundary`.
    Atomic { increment: u32, wrap_boundary: u32 },
    Socket(SocketParams),
}

/// Reasons a header is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderError {
    /// Fewer than a header's worth of bytes were supplied.
    Truncated(usize),
    Checksum { expected: u16, actual: u16 },
    UnknownFlags(u8),
    UnknownCommand(u8),
    /// The packet size cannot hold the header.
    Size(u32),
    /// A header-only packet claims to carry a payload.
    UnexpectedPayload(u32),
    /// The parameters are not the ones the command and routing flags use.
    MismatchedParams(Command),
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderError::Truncated(len) => write!(f, "truncated header ({len} bytes)"),
            HeaderError::Checksum { expected, actual } => {
                write!(f, "checksum {actual:#06x} should be {expected:#06x}")
            }
            HeaderError::UnknownFlags(flags) => write!(f, "unknown routing flags {flags:#x}"),
            HeaderError::UnknownCommand(cmd) => write!(f, "unknown command {cmd}"),
            HeaderError::Size(size) => write!(f, "invalid packet size {size}"),
            HeaderError::UnexpectedPayload(size) => {
                write!(f, "header-only packet has size {size}")
            }
            HeaderError::MismatchedParams(command) => {
                write!(f, "parameters do not match {command:?}")
            }
        }
    }
}

impl std::error::Error for HeaderError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_size_bytes: u32,
    pub dst_mesh_id: u16,
    pub dst_device_id: u16,
    pub src_mesh_id: u16,
    pub src_device_id: u16,
    pub routing_flags: RoutingFlags,
    pub command: Command,
    pub session_target_address: u64,
    /// Atomic parameters go with an inline `AsyncWrite` and socket
    /// parameters with a socket control command. Any other pairing is
    /// rejected by [`PacketHeader::validate`].
    pub params: PacketParams,
    /// Address of the sender's in-flight counter, 0 when no response is
    /// wanted.
    pub response_address: u64,
}

impl PacketHeader {
    /// Create a header-only packet.
    #[must_use]
    pub fn new(command: Command, dst_mesh_id: u16, dst_device_id: u16) -> Self {
        Self {
            packet_size_bytes: HEADER_BYTES,
            dst_mesh_id,
            dst_device_id,
            src_mesh_id: 0,
            src_device_id: 0,
            routing_flags: RoutingFlags::Forward,
            command,
            session_target_address: 0,
            params: PacketParams::None,
            response_address: 0,
        }
    }

    #[must_use]
    pub fn set_src(mut self, src_mesh_id: u16, src_device_id: u16) -> Self {
        self.src_mesh_id = src_mesh_id;
        self.src_device_id = src_device_id;
        self
    }

    #[must_use]
    pub fn set_target(mut self, session_target_address: u64) -> Self {
        self.session_target_address = session_target_address;
        self
    }

    #[must_use]
    pub fn set_payload_bytes(mut self, payload_bytes: u32) -> Self {
        self.packet_size_bytes = HEADER_BYTES + payload_bytes;
        self
    }

    #[must_use]
    pub fn set_response_address(mut self, response_address: u64) -> Self {
        self.response_address = response_address;
        self
    }

    /// Turn this into a header-only atomic increment.
    #[must_use]
    pub fn set_atomic(mut self, increment: u32, wrap_boundary: u32) -> Self {
        self.routing_flags = RoutingFlags::InlineForward;
        self.packet_size_bytes = HEADER_BYTES;
        self.params = PacketParams::Atomic {
            increment,
            wrap_boundary,
        };
        self
    }

    #[must_use]
    pub fn set_socket(mut self, socket: SocketParams) -> Self {
        self.params = PacketParams::Socket(socket);
        self
    }

    #[must_use]
    pub fn payload_bytes(&self) -> u32 {
        self.packet_size_bytes - HEADER_BYTES
    }

    /// Words taken by the whole packet in a buffer.
    #[must_use]
    pub fn total_words(&self) -> u32 {
        words_for_bytes(self.packet_size_bytes)
    }

    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.routing_flags == RoutingFlags::InlineForward
    }

    fn header_only(&self) -> bool {
        self.is_inline()
            || self.command.is_socket_control()
            || self.command == Command::AsyncWriteResponse
    }

    fn params_match(&self) -> bool {
        match self.params {
            PacketParams::None => !self.is_inline() && !self.command.is_socket_control(),
            PacketParams::Atomic { .. } => self.is_inline() && self.command == Command::AsyncWrite,
            PacketParams::Socket(_) => !self.is_inline() && self.command.is_socket_control(),
        }
    }

    /// Check that the size, flags, command and parameters fit together.
    ///
    /// Only a valid header survives [`PacketHeader::encode`] followed by
    /// [`PacketHeader::decode`] unchanged.
    pub fn validate(&self) -> Result<(), HeaderError> {
        if self.packet_size_bytes < HEADER_BYTES {
            return Err(HeaderError::Size(self.packet_size_bytes));
        }
        if self.header_only() && self.packet_size_bytes != HEADER_BYTES {
            return Err(HeaderError::UnexpectedPayload(self.packet_size_bytes));
        }
        if !self.params_match() {
            return Err(HeaderError::MismatchedParams(self.command));
        }
        Ok(())
    }

    /// Encode the header, computing its checksum.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_BYTES as usize] {
        let mut bytes = [0; HEADER_BYTES as usize];
        put_u32(&mut bytes, SIZE_OFFSET, self.packet_size_bytes);
        put_u16(&mut bytes, DST_MESH_OFFSET, self.dst_mesh_id);
        put_u16(&mut bytes, DST_DEVICE_OFFSET, self.dst_device_id);
        bytes[FLAGS_OFFSET] = self.routing_flags as u8;
        bytes[COMMAND_OFFSET] = self.command as u8;
        put_u16(&mut bytes, SRC_DEVICE_OFFSET, self.src_device_id);
        put_u16(&mut bytes, SRC_MESH_OFFSET, self.src_mesh_id);
        put_u64(&mut bytes, TARGET_OFFSET, self.session_target_address);
        match self.params {
            PacketParams::None => {}
            PacketParams::Atomic {
                increment,
                wrap_boundary,
            } => {
                put_u32(&mut bytes, PARAMS_OFFSET, increment);
                put_u32(&mut bytes, PARAMS_OFFSET + 4, wrap_boundary);
            }
            PacketParams::Socket(socket) => {
                put_u16(&mut bytes, PARAMS_OFFSET, socket.socket_id);
                put_u16(&mut bytes, PARAMS_OFFSET + 2, socket.epoch_id);
                bytes[PARAMS_OFFSET + 4] = socket.socket_type;
                bytes[PARAMS_OFFSET + 5] = socket.direction;
            }
        }
        put_u64(&mut bytes, RESPONSE_OFFSET, self.response_address);
        let checksum = checksum(&bytes);
        put_u16(&mut bytes, CHECKSUM_OFFSET, checksum);
        bytes
    }

    /// Decode and validate a header.
    pub fn decode(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < HEADER_BYTES as usize {
            return Err(HeaderError::Truncated(bytes.len()));
        }
        let bytes = &bytes[..HEADER_BYTES as usize];

        let expected = checksum(bytes);
        let actual = get_u16(bytes, CHECKSUM_OFFSET);
        if expected != actual {
            return Err(HeaderError::Checksum { expected, actual });
        }

        let routing_flags = RoutingFlags::from_u8(bytes[FLAGS_OFFSET])
            .ok_or(HeaderError::UnknownFlags(bytes[FLAGS_OFFSET]))?;
        let command = Command::from_u8(bytes[COMMAND_OFFSET])
            .ok_or(HeaderError::UnknownCommand(bytes[COMMAND_OFFSET]))?;

        let params_bytes = &bytes[PARAMS_OFFSET..RESPONSE_OFFSET];
        let params = if routing_flags == RoutingFlags::InlineForward {
            PacketParams::Atomic {
                increment: get_u32(bytes, PARAMS_OFFSET),
                wrap_boundary: get_u32(bytes, PARAMS_OFFSET + 4),
            }
        } else if command.is_socket_control() {
            PacketParams::Socket(SocketParams {
                socket_id: get_u16(bytes, PARAMS_OFFSET),
                epoch_id: get_u16(bytes, PARAMS_OFFSET + 2),
                socket_type: bytes[PARAMS_OFFSET + 4],
                direction: bytes[PARAMS_OFFSET + 5],
            })
        } else if params_bytes.iter().all(|b| *b == 0) {
            PacketParams::None
        } else {
            return Err(HeaderError::MismatchedParams(command));
        };

        let header = Self {
            packet_size_bytes: get_u32(bytes, SIZE_OFFSET),
            dst_mesh_id: get_u16(bytes, DST_MESH_OFFSET),
            dst_device_id: get_u16(bytes, DST_DEVICE_OFFSET),
            src_mesh_id: get_u16(bytes, SRC_MESH_OFFSET),
            src_device_id: get_u16(bytes, SRC_DEVICE_OFFSET),
            routing_flags,
            command,
            session_target_address: get_u64(bytes, TARGET_OFFSET),
            params,
            response_address: get_u64(bytes, RESPONSE_OFFSET),
        };
        header.validate()?;
        Ok(header)
    }
}

impl fmt::Display for PacketHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {}/{} -> {}/{} ({} bytes)",
            self.command,
            self.src_mesh_id,
            self.src_device_id,
            self.dst_mesh_id,
            self.dst_device_id,
            self.packet_size_bytes
        )
    }
}

/// Ones-complement of the wrapping sum of all 16-bit halves of the header,
/// with the checksum field read as zero.
fn checksum(bytes: &[u8]) -> u16 {
    let sum = bytes
        .chunks_exact(2)
        .enumerate()
        .filter(|(i, _)| i * 2 != CHECKSUM_OFFSET)
        .fold(0u16, |acc, (_, half)| {
            acc.wrapping_add(u16::from_le_bytes([half[0], half[1]]))
        });
    !sum
}

fn put_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn get_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

pub(crate) fn get_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

pub(crate) fn get_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}
