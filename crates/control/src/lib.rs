pub mod coerce;
pub mod dispatcher;
pub mod listener;
pub mod transport;

pub use dispatcher::{Dispatcher, Intent};
pub use listener::{InboundPolicy, ListenerConfig, ListenerError, ListenerHandle};
pub use transport::{FrameSink, UdpTransport};
