use std::{
    io,
    net::{SocketAddr, UdpSocket},
};

use codec::FRAME_LEN;

/// Outbound path to the central station.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: &[u8; FRAME_LEN]) -> io::Result<()>;
}

/// Fire-and-forget UDP sender; the device never acknowledges.
pub struct UdpTransport {
    socket: UdpSocket,
    device: SocketAddr,
}

impl UdpTransport {
    pub fn bind(device: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = if device.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        if let SocketAddr::V4(v4) = device {
            socket.set_broadcast(v4.ip().is_broadcast())?;
        }
        Ok(Self { socket, device })
    }

    pub fn device(&self) -> SocketAddr {
        self.device
    }
}

impl FrameSink for UdpTransport {
    fn send_frame(&self, frame: &[u8; FRAME_LEN]) -> io::Result<()> {
        let sent = self.socket.send_to(frame, self.device)?;
        if sent != FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short datagram: {sent} of {FRAME_LEN} bytes"),
            ));
        }
        Ok(())
    }
}
