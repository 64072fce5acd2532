use std::sync::Arc;

use codec::{CodecError, Message, ACCESSORY_BASE_UID, SWITCH_PROTOCOL_TAG};
use serde_json::Value;
use shared::{
    domain::{DeviceUid, Direction, SystemState, MAX_SPEED, SWITCH_COUNT},
    error::ControlError,
};
use state_store::{StateError, StateStore};
use tracing::{debug, error, warn};

use crate::{
    coerce::{
        parse_direction, parse_flag, parse_function_index, parse_speed, parse_switch_index,
        parse_switch_value, parse_uid,
    },
    transport::FrameSink,
};

/// A validated control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    System { target: DeviceUid, running: bool },
    Speed { uid: DeviceUid, speed: u16 },
    Direction { uid: DeviceUid, direction: Direction },
    Function { uid: DeviceUid, index: u8, on: bool },
    Switch { index: usize, value: u8 },
}

impl Intent {
    pub fn toggle_system(running: Option<&Value>) -> Result<Self, ControlError> {
        Ok(Intent::System {
            target: DeviceUid::SYSTEM,
            running: parse_flag(running, "state")?,
        })
    }

    pub fn set_speed(uid: Option<&Value>, speed: Option<&Value>) -> Result<Self, ControlError> {
        Ok(Intent::Speed {
            uid: parse_uid(uid)?,
            speed: parse_speed(speed)?,
        })
    }

    pub fn set_direction(
        uid: Option<&Value>,
        direction: Option<&Value>,
    ) -> Result<Self, ControlError> {
        Ok(Intent::Direction {
            uid: parse_uid(uid)?,
            direction: parse_direction(direction)?,
        })
    }

    pub fn set_function(
        uid: Option<&Value>,
        function: Option<&Value>,
        value: Option<&Value>,
    ) -> Result<Self, ControlError> {
        Ok(Intent::Function {
            uid: parse_uid(uid)?,
            index: parse_function_index(function)?,
            on: parse_flag(value, "value")?,
        })
    }

    pub fn set_switch(idx: Option<&Value>, value: Option<&Value>) -> Result<Self, ControlError> {
        Ok(Intent::Switch {
            index: parse_switch_index(idx)?,
            value: parse_switch_value(value)?,
        })
    }
}

/// Applies intents to the state store and forwards them to the device.
///
/// The store is updated before the frame goes out and is not rolled back
/// when the send fails: observers see the requested state either way.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<StateStore>,
    sink: Arc<dyn FrameSink>,
}

impl Dispatcher {
    pub fn new(store: Arc<StateStore>, sink: Arc<dyn FrameSink>) -> Self {
        Self { store, sink }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn dispatch(&self, intent: Intent) -> Result<(), ControlError> {
        let message = self.apply(intent)?;
        let frame = message.to_frame().map_err(|error| {
            error!(%error, ?message, "failed to encode control frame");
            match error {
                CodecError::PayloadTooLong { len } | CodecError::FrameMalformed { len } => {
                    ControlError::PayloadTooLong { len }
                }
            }
        })?;

        self.sink.send_frame(&frame.encode()).map_err(|error| {
            warn!(%error, ?intent, "failed to transmit control frame");
            ControlError::TransmitFailure(error)
        })?;
        debug!(?intent, "control frame sent");
        Ok(())
    }

    fn apply(&self, intent: Intent) -> Result<Message, ControlError> {
        let message = match intent {
            Intent::System { target, running } => {
                let state = if running {
                    SystemState::Running
                } else {
                    SystemState::Stopped
                };
                self.store.set_system_state(state);
                Message::System {
                    target: target.0,
                    status: running as u8,
                }
            }
            Intent::Speed { uid, speed } => {
                let speed = speed.min(MAX_SPEED);
                self.store.set_loco_speed(uid, speed);
                Message::Speed { uid: uid.0, speed }
            }
            Intent::Direction { uid, direction } => {
                self.store.set_loco_direction(uid, direction);
                Message::Direction {
                    uid: uid.0,
                    code: direction.code(),
                }
            }
            Intent::Function { uid, index, on } => {
                self.store
                    .set_loco_function(uid, index, on)
                    .map_err(state_error)?;
                Message::Function {
                    uid: uid.0,
                    index,
                    value: on as u8,
                }
            }
            Intent::Switch { index, value } => {
                self.store.set_switch(index, value).map_err(state_error)?;
                Message::Switch {
                    uid: ACCESSORY_BASE_UID + index as u32,
                    value,
                    tag: SWITCH_PROTOCOL_TAG,
                }
            }
        };
        Ok(message)
    }
}

fn state_error(error: StateError) -> ControlError {
    match error {
        StateError::IndexOutOfRange { index } => ControlError::IndexOutOfRange {
            index: index as i64,
            limit: SWITCH_COUNT,
        },
        StateError::FunctionOutOfRange { index } => {
            ControlError::invalid_value("function", format!("index {index} out of range"))
        }
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
