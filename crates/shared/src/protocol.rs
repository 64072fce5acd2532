use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{DeviceUid, LocoState, SystemState, SWITCH_COUNT};

/// State-change notification fanned out to every connected observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    System {
        status: u8,
    },
    Speed {
        loc_id: DeviceUid,
        value: u16,
    },
    Direction {
        loc_id: DeviceUid,
        value: u8,
    },
    Function {
        loc_id: DeviceUid,
        #[serde(rename = "fn")]
        function: u8,
        value: u8,
    },
    Switch {
        idx: usize,
        value: u8,
    },
    Error {
        message: String,
    },
}

impl Event {
    pub fn error(message: impl Into<String>) -> Self {
        Event::Error {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub system: SystemState,
    pub locos: BTreeMap<DeviceUid, LocoState>,
    pub switches: Vec<u8>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            system: SystemState::default(),
            locos: BTreeMap::new(),
            switches: vec![0; SWITCH_COUNT],
        }
    }
}

impl StateSnapshot {
    /// Expands the snapshot into the same events live updates use, so a fresh
    /// observer converges by applying them in order.
    pub fn replay_events(&self) -> Vec<Event> {
        let mut events = vec![Event::System {
            status: self.system.status(),
        }];

        for (&loc_id, loco) in &self.locos {
            events.push(Event::Speed {
                loc_id,
                value: loco.speed,
            });
            events.push(Event::Direction {
                loc_id,
                value: loco.direction.code(),
            });
            events.extend(loco.active_functions().map(|function| Event::Function {
                loc_id,
                function,
                value: 1,
            }));
        }

        events.extend(
            self.switches
                .iter()
                .enumerate()
                .map(|(idx, &value)| Event::Switch { idx, value }),
        );
        events
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchStateResponse {
    pub switch_state: Vec<u8>,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
