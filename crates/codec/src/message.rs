use crate::{CanFrame, CanId, CodecError, Command};

/// Accessory decoders are addressed as `ACCESSORY_BASE_UID + index`.
pub const ACCESSORY_BASE_UID: u32 = 0x3000;
/// D5 of a switch frame.
pub const SWITCH_PROTOCOL_TAG: u8 = 0x01;

/// Payload of the commands the bridge understands, decoded field by field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    System { target: u32, status: u8 },
    Speed { uid: u32, speed: u16 },
    Direction { uid: u32, code: u8 },
    Function { uid: u32, index: u8, value: u8 },
    Switch { uid: u32, value: u8, tag: u8 },
}

impl Message {
    pub fn command(&self) -> Command {
        match self {
            Message::System { .. } => Command::System,
            Message::Speed { .. } => Command::Speed,
            Message::Direction { .. } => Command::Direction,
            Message::Function { .. } => Command::Function,
            Message::Switch { .. } => Command::Switch,
        }
    }

    pub fn uid(&self) -> u32 {
        match *self {
            Message::System { target, .. } => target,
            Message::Speed { uid, .. }
            | Message::Direction { uid, .. }
            | Message::Function { uid, .. }
            | Message::Switch { uid, .. } => uid,
        }
    }

    fn payload(&self) -> Vec<u8> {
        let mut payload = self.uid().to_be_bytes().to_vec();
        match *self {
            Message::System { status, .. } => payload.push(status),
            Message::Speed { speed, .. } => payload.extend_from_slice(&speed.to_be_bytes()),
            Message::Direction { code, .. } => payload.push(code),
            Message::Function { index, value, .. } => payload.extend_from_slice(&[index, value]),
            Message::Switch { value, tag, .. } => payload.extend_from_slice(&[value, tag]),
        }
        payload
    }

    /// Minimum DLC carrying every field this message reads.
    fn required_dlc(command: Command) -> Option<u8> {
        match command {
            Command::System | Command::Direction | Command::Switch => Some(5),
            Command::Speed | Command::Function => Some(6),
            _ => None,
        }
    }

    pub fn to_frame(&self) -> Result<CanFrame, CodecError> {
        CanFrame::new(CanId::new(self.uid(), self.command()), &self.payload())
    }

    /// `None` for commands outside this set and for runt frames whose DLC
    /// stops short of the fields (a speed or function query, for instance).
    pub fn from_frame(frame: &CanFrame) -> Option<Self> {
        let command = frame.id.command()?;
        if frame.dlc < Self::required_dlc(command)? {
            return None;
        }

        let uid = frame.uid();
        let data = &frame.data;
        Some(match command {
            Command::System => Message::System {
                target: uid,
                status: data[4],
            },
            Command::Speed => Message::Speed {
                uid,
                speed: u16::from_be_bytes([data[4], data[5]]),
            },
            Command::Direction => Message::Direction { uid, code: data[4] },
            Command::Function => Message::Function {
                uid,
                index: data[4],
                value: data[5],
            },
            Command::Switch => Message::Switch {
                uid,
                value: data[4],
                tag: data[5],
            },
            _ => return None,
        })
    }
}

#[cfg(test)]
#[path = "tests/message_tests.rs"]
mod tests;
