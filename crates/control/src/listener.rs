//! Receive loop for frames the central station sends on its own.

use std::{
    io,
    net::{SocketAddr, UdpSocket},
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use codec::{CanFrame, Message, ACCESSORY_BASE_UID};
use shared::{
    domain::{DeviceUid, Direction, SystemState},
    protocol::Event,
};
use state_store::StateStore;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

pub const DEFAULT_LISTEN_PORT: u16 = 15730;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(10);
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);
/// Larger than any frame so oversized datagrams keep their true length.
const RECV_BUFFER_LEN: usize = 1500;

/// Which well-formed frames update state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InboundPolicy {
    /// Only frames with the response flag set, i.e. what the device confirms.
    #[default]
    Acknowledged,
    /// Requests from other controllers on the bus as well.
    All,
}

impl FromStr for InboundPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "acknowledged" | "responses" => Ok(InboundPolicy::Acknowledged),
            "all" => Ok(InboundPolicy::All),
            other => Err(format!("unknown inbound policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind: SocketAddr,
    pub read_timeout: Duration,
    pub policy: InboundPolicy,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: ([0, 0, 0, 0], DEFAULT_LISTEN_PORT).into(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            policy: InboundPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to start listener thread: {0}")]
    Spawn(#[source] io::Error),
}

pub struct ListenerHandle {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map_or(true, |thread| thread.is_finished())
    }

    /// Returns once the loop has observed the signal, at most one read
    /// timeout later.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("listener thread panicked");
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Binds the receive socket and starts the loop on its own thread.
///
/// A bind failure is published once as an `error` event and returned; the
/// caller keeps running without live device updates.
pub fn spawn(config: ListenerConfig, store: Arc<StateStore>) -> Result<ListenerHandle, ListenerError> {
    let socket = match bind(&config) {
        Ok(socket) => socket,
        Err(source) => {
            let error = ListenerError::Bind {
                addr: config.bind,
                source,
            };
            error!(%error, "inbound listener disabled");
            store.bus().publish(&Event::error(error.to_string()));
            return Err(error);
        }
    };
    let local_addr = socket.local_addr().unwrap_or(config.bind);

    let stop = Arc::new(AtomicBool::new(false));
    let thread = thread::Builder::new()
        .name("cs2-listener".into())
        .spawn({
            let stop = Arc::clone(&stop);
            move || run(socket, config.policy, store, stop)
        })
        .map_err(ListenerError::Spawn)?;

    info!(%local_addr, policy = ?config.policy, "inbound listener started");
    Ok(ListenerHandle {
        local_addr,
        stop,
        thread: Some(thread),
    })
}

fn bind(config: &ListenerConfig) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(config.bind)?;
    socket.set_read_timeout(Some(config.read_timeout.max(MIN_READ_TIMEOUT)))?;
    Ok(socket)
}

fn run(socket: UdpSocket, policy: InboundPolicy, store: Arc<StateStore>, stop: Arc<AtomicBool>) {
    let mut buf = [0u8; RECV_BUFFER_LEN];
    while !stop.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((len, peer)) => {
                if let Some(message) = apply_datagram(&store, policy, &buf[..len]) {
                    debug!(%peer, ?message, "applied device frame");
                }
            }
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) => {}
            Err(error) => {
                warn!(%error, "listener receive failed");
                thread::sleep(RECV_ERROR_BACKOFF);
            }
        }
    }
    info!("inbound listener stopped");
}

/// Decodes one datagram and applies it to the store. Malformed, runt,
/// unsupported and policy-filtered frames are dropped silently.
pub fn apply_datagram(
    store: &StateStore,
    policy: InboundPolicy,
    datagram: &[u8],
) -> Option<Message> {
    let frame = match CanFrame::decode(datagram) {
        Ok(frame) => frame,
        Err(error) => {
            trace!(%error, "discarding datagram");
            return None;
        }
    };
    if policy == InboundPolicy::Acknowledged && !frame.id.response {
        trace!(command = frame.id.command, "discarding unacknowledged frame");
        return None;
    }
    let Some(message) = Message::from_frame(&frame) else {
        trace!(command = frame.id.command, dlc = frame.dlc, "discarding frame");
        return None;
    };

    match message {
        Message::System { status, .. } => {
            let system = match status {
                0 => SystemState::Stopped,
                1 => SystemState::Running,
                2 => SystemState::Halted,
                _ => return None,
            };
            store.set_system_state(system);
        }
        Message::Speed { uid, speed } => {
            store.set_loco_speed(DeviceUid(uid), speed);
        }
        Message::Direction { uid, code } => {
            store.set_loco_direction(DeviceUid(uid), Direction::from_code(code));
        }
        Message::Function { uid, index, value } => {
            store
                .set_loco_function(DeviceUid(uid), index, value != 0)
                .ok()?;
        }
        Message::Switch { uid, value, .. } => {
            let idx = uid.checked_sub(ACCESSORY_BASE_UID)? as usize;
            store.set_switch(idx, value).ok()?;
        }
    }
    Some(message)
}

#[cfg(test)]
#[path = "tests/listener_tests.rs"]
mod tests;
