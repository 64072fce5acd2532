use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Highest speed step the central station accepts.
pub const MAX_SPEED: u16 = 1023;
/// Function slots per locomotive (F0..F31).
pub const FUNCTION_COUNT: u8 = 32;
/// Accessory positions tracked by the switch table.
pub const SWITCH_COUNT: usize = 64;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);
    };
}

id_newtype!(DeviceUid);

impl DeviceUid {
    /// UID 0 addresses the central station itself.
    pub const SYSTEM: DeviceUid = DeviceUid(0);
}

impl fmt::Display for DeviceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl From<u32> for DeviceUid {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    #[default]
    Stopped,
    Running,
    Halted,
}

impl SystemState {
    /// Status value carried by `system` events: 1 only while running.
    pub fn status(self) -> u8 {
        match self {
            SystemState::Running => 1,
            SystemState::Stopped | SystemState::Halted => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Keep,
    #[default]
    Forward,
    Reverse,
    Toggle,
}

impl Direction {
    pub fn code(self) -> u8 {
        match self {
            Direction::Keep => 0,
            Direction::Forward => 1,
            Direction::Reverse => 2,
            Direction::Toggle => 3,
        }
    }

    /// Unknown codes fall back to `Keep`.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Direction::Forward,
            2 => Direction::Reverse,
            3 => Direction::Toggle,
            _ => Direction::Keep,
        }
    }

    /// Resolves a requested direction against the current one. `Keep` and
    /// `Toggle` never end up stored.
    pub fn resolve(self, current: Direction) -> Direction {
        match self {
            Direction::Keep => current,
            Direction::Toggle => match current {
                Direction::Reverse => Direction::Forward,
                _ => Direction::Reverse,
            },
            concrete => concrete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocoState {
    pub speed: u16,
    pub direction: Direction,
    pub functions: BTreeMap<u8, bool>,
}

impl Default for LocoState {
    fn default() -> Self {
        Self {
            speed: 0,
            direction: Direction::Forward,
            functions: BTreeMap::new(),
        }
    }
}

impl LocoState {
    pub fn active_functions(&self) -> impl Iterator<Item = u8> + '_ {
        self.functions
            .iter()
            .filter(|(_, on)| **on)
            .map(|(index, _)| *index)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocoSummary {
    pub uid: DeviceUid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tachomax: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchSummary {
    pub idx: usize,
    pub name: String,
}
