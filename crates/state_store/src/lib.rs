use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use event_bus::{EventBus, Subscription};
use shared::{
    domain::{DeviceUid, Direction, LocoState, SystemState, FUNCTION_COUNT, MAX_SPEED, SWITCH_COUNT},
    protocol::{Event, StateSnapshot},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("switch index {index} out of range 0..64")]
    IndexOutOfRange { index: usize },
    #[error("function index {index} out of range 0..32")]
    FunctionOutOfRange { index: u8 },
}

struct State {
    system: SystemState,
    locos: BTreeMap<DeviceUid, LocoState>,
    switches: [u8; SWITCH_COUNT],
}

impl State {
    fn loco_mut(&mut self, uid: DeviceUid) -> &mut LocoState {
        self.locos.entry(uid).or_default()
    }
}

/// Canonical system, locomotive and switch state.
///
/// Every mutator that changes a value publishes exactly one event, and does
/// so while still holding the state lock. `subscribe` takes the same lock, so
/// a new observer's snapshot replay can never interleave with a live update.
pub struct StateStore {
    state: Mutex<State>,
    bus: EventBus,
}

impl StateStore {
    pub fn new(bus: EventBus) -> Self {
        Self {
            state: Mutex::new(State {
                system: SystemState::default(),
                locos: BTreeMap::new(),
                switches: [0; SWITCH_COUNT],
            }),
            bus,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate<R>(&self, apply: impl FnOnce(&mut State) -> (R, Option<Event>)) -> R {
        let mut state = self.lock();
        let (result, event) = apply(&mut state);
        if let Some(event) = event {
            debug!(?event, "state changed");
            self.bus.publish(&event);
        }
        result
    }

    pub fn system_state(&self) -> SystemState {
        self.lock().system
    }

    /// Returns whether the state changed.
    ///
    /// Stopped and Halted share status 0 on the wire, so a move between them
    /// still publishes one `system` event carrying an unchanged status.
    pub fn set_system_state(&self, system: SystemState) -> bool {
        self.mutate(|state| {
            if state.system == system {
                return (false, None);
            }
            state.system = system;
            (
                true,
                Some(Event::System {
                    status: system.status(),
                }),
            )
        })
    }

    /// Creates the default record on first reference.
    pub fn loco_state(&self, uid: DeviceUid) -> LocoState {
        self.lock().loco_mut(uid).clone()
    }

    /// Catalog entries are known from startup without emitting anything.
    pub fn register_locos(&self, uids: impl IntoIterator<Item = DeviceUid>) {
        let mut state = self.lock();
        for uid in uids {
            state.loco_mut(uid);
        }
    }

    pub fn set_loco_speed(&self, uid: DeviceUid, speed: u16) -> bool {
        let speed = speed.min(MAX_SPEED);
        self.mutate(|state| {
            let loco = state.loco_mut(uid);
            if loco.speed == speed {
                return (false, None);
            }
            loco.speed = speed;
            (
                true,
                Some(Event::Speed {
                    loc_id: uid,
                    value: speed,
                }),
            )
        })
    }

    /// `Toggle` flips the stored direction and `Keep` leaves it alone.
    pub fn set_loco_direction(&self, uid: DeviceUid, direction: Direction) -> bool {
        self.mutate(|state| {
            let loco = state.loco_mut(uid);
            let resolved = direction.resolve(loco.direction);
            if loco.direction == resolved {
                return (false, None);
            }
            loco.direction = resolved;
            (
                true,
                Some(Event::Direction {
                    loc_id: uid,
                    value: resolved.code(),
                }),
            )
        })
    }

    pub fn set_loco_function(
        &self,
        uid: DeviceUid,
        index: u8,
        on: bool,
    ) -> Result<bool, StateError> {
        if index >= FUNCTION_COUNT {
            return Err(StateError::FunctionOutOfRange { index });
        }
        Ok(self.mutate(|state| {
            let loco = state.loco_mut(uid);
            let previous = loco.functions.insert(index, on).unwrap_or(false);
            if previous == on {
                return (false, None);
            }
            (
                true,
                Some(Event::Function {
                    loc_id: uid,
                    function: index,
                    value: on as u8,
                }),
            )
        }))
    }

    pub fn switch(&self, idx: usize) -> Result<u8, StateError> {
        check_switch_index(idx)?;
        Ok(self.lock().switches[idx])
    }

    pub fn switches(&self) -> Vec<u8> {
        self.lock().switches.to_vec()
    }

    pub fn set_switch(&self, idx: usize, value: u8) -> Result<bool, StateError> {
        check_switch_index(idx)?;
        Ok(self.mutate(|state| {
            if state.switches[idx] == value {
                return (false, None);
            }
            state.switches[idx] = value;
            (true, Some(Event::Switch { idx, value }))
        }))
    }

    pub fn snapshot(&self) -> StateSnapshot {
        snapshot_of(&self.lock())
    }

    /// Registers an observer whose queue starts with a full replay of the
    /// current state.
    pub fn subscribe(&self) -> Subscription {
        let state = self.lock();
        let replay = snapshot_of(&state).replay_events();
        self.bus.subscribe_with(replay)
    }
}

fn snapshot_of(state: &State) -> StateSnapshot {
    StateSnapshot {
        system: state.system,
        locos: state.locos.clone(),
        switches: state.switches.to_vec(),
    }
}

fn check_switch_index(idx: usize) -> Result<(), StateError> {
    if idx < SWITCH_COUNT {
        Ok(())
    } else {
        Err(StateError::IndexOutOfRange { index: idx })
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
