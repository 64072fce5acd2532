//! Wire codec for the central station's CAN-over-UDP protocol.
//!
//! Every datagram is exactly 13 bytes: a big-endian 32-bit CAN-ID, one DLC
//! byte and an 8-byte payload that is always present on the wire, zero
//! padded past the DLC.

use thiserror::Error;

mod message;

pub use message::{Message, ACCESSORY_BASE_UID, SWITCH_PROTOCOL_TAG};

pub const FRAME_LEN: usize = 13;
pub const PAYLOAD_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("payload of {len} bytes exceeds 8 bytes")]
    PayloadTooLong { len: usize },
    #[error("malformed frame: expected 13 bytes, got {len}")]
    FrameMalformed { len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    System = 0,
    Discovery = 1,
    Bind = 2,
    Verify = 3,
    Speed = 4,
    Direction = 5,
    Function = 6,
    ReadConfig = 7,
    WriteConfig = 8,
    Switch = 11,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Command::System,
            1 => Command::Discovery,
            2 => Command::Bind,
            3 => Command::Verify,
            4 => Command::Speed,
            5 => Command::Direction,
            6 => Command::Function,
            7 => Command::ReadConfig,
            8 => Command::WriteConfig,
            11 => Command::Switch,
            other => return Err(other),
        })
    }
}

/// 16-bit address token derived from a UID.
pub fn hash(uid: u32) -> u16 {
    let high = uid >> 16;
    let low = uid & 0xFFFF;
    let folded = high ^ low;
    let hash = ((folded << 3) & 0xFF00) | 0x0300 | (folded & 0x7F);
    (hash & 0xFFFF) as u16
}

/// Decomposed CAN-ID: `priority(7) | command(8) | response(1) | hash(16)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanId {
    pub priority: u8,
    pub command: u8,
    pub response: bool,
    pub hash: u16,
}

impl CanId {
    pub fn new(uid: u32, command: Command) -> Self {
        Self {
            priority: 0,
            command: command as u8,
            response: false,
            hash: hash(uid),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority & 0x7F;
        self
    }

    pub fn with_response(mut self, response: bool) -> Self {
        self.response = response;
        self
    }

    pub fn to_raw(self) -> u32 {
        let command_response = ((self.command as u32) << 1) | (self.response as u32);
        ((self.priority as u32 & 0x7F) << 25) | (command_response << 16) | self.hash as u32
    }

    pub fn from_raw(raw: u32) -> Self {
        let command_response = (raw >> 16) & 0x1FF;
        Self {
            priority: ((raw >> 25) & 0x7F) as u8,
            command: ((command_response >> 1) & 0xFF) as u8,
            response: command_response & 1 == 1,
            hash: (raw & 0xFFFF) as u16,
        }
    }

    /// `None` for reserved or unknown command codes.
    pub fn command(self) -> Option<Command> {
        Command::try_from(self.command).ok()
    }
}

pub fn build_can_id(uid: u32, command: Command, priority: u8, response: bool) -> u32 {
    CanId::new(uid, command)
        .with_priority(priority)
        .with_response(response)
        .to_raw()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    pub id: CanId,
    pub dlc: u8,
    pub data: [u8; PAYLOAD_LEN],
}

impl CanFrame {
    /// DLC follows the payload length.
    pub fn new(id: CanId, payload: &[u8]) -> Result<Self, CodecError> {
        Self::with_dlc(id, payload, payload.len() as u8)
    }

    pub fn with_dlc(id: CanId, payload: &[u8], dlc: u8) -> Result<Self, CodecError> {
        if payload.len() > PAYLOAD_LEN {
            return Err(CodecError::PayloadTooLong { len: payload.len() });
        }
        let mut data = [0u8; PAYLOAD_LEN];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self { id, dlc, data })
    }

    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[..4].copy_from_slice(&self.id.to_raw().to_be_bytes());
        bytes[4] = self.dlc;
        bytes[5..].copy_from_slice(&self.data);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let bytes: &[u8; FRAME_LEN] = bytes
            .try_into()
            .map_err(|_| CodecError::FrameMalformed { len: bytes.len() })?;
        let mut raw_id = [0u8; 4];
        raw_id.copy_from_slice(&bytes[..4]);
        let mut data = [0u8; PAYLOAD_LEN];
        data.copy_from_slice(&bytes[5..]);
        Ok(Self {
            id: CanId::from_raw(u32::from_be_bytes(raw_id)),
            dlc: bytes[4],
            data,
        })
    }

    /// D0..D3 as a big-endian UID.
    pub fn uid(&self) -> u32 {
        u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]])
    }
}

pub fn encode_frame(can_id: u32, payload: &[u8], dlc: u8) -> Result<[u8; FRAME_LEN], CodecError> {
    CanFrame::with_dlc(CanId::from_raw(can_id), payload, dlc).map(|frame| frame.encode())
}

pub fn decode_frame(bytes: &[u8]) -> Result<CanFrame, CodecError> {
    CanFrame::decode(bytes)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
