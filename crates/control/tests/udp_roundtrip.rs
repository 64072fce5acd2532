use std::{
    net::UdpSocket,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use codec::{decode_frame, Command, FRAME_LEN};
use control::{Dispatcher, InboundPolicy, Intent, ListenerConfig, UdpTransport};
use event_bus::EventBus;
use serde_json::json;
use shared::domain::DeviceUid;
use state_store::StateStore;

/// Plays the central station: receives one command, echoes it back to the
/// bridge's listener with the response flag set and a different speed.
#[test]
fn device_echo_reaches_the_store_through_the_listener() {
    let bridge_store = Arc::new(StateStore::new(EventBus::new()));
    let listener = control::listener::spawn(
        ListenerConfig {
            bind: ([127, 0, 0, 1], 0).into(),
            read_timeout: Duration::from_millis(50),
            policy: InboundPolicy::Acknowledged,
        },
        Arc::clone(&bridge_store),
    )
    .expect("listener");

    let device = UdpSocket::bind("127.0.0.1:0").expect("device");
    device
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("timeout");
    let device_addr = device.local_addr().expect("addr");
    let transport = UdpTransport::bind(device_addr).expect("transport");
    assert_eq!(transport.device(), device_addr);
    let dispatcher = Dispatcher::new(Arc::clone(&bridge_store), Arc::new(transport));

    dispatcher
        .dispatch(Intent::set_speed(Some(&json!(0x4711)), Some(&json!(300))).expect("intent"))
        .expect("dispatch");

    let mut buf = [0u8; 64];
    let (len, _) = device.recv_from(&mut buf).expect("command datagram");
    assert_eq!(len, FRAME_LEN);
    let mut frame = decode_frame(&buf[..len]).expect("frame");
    assert_eq!(frame.id.command(), Some(Command::Speed));
    assert!(!frame.id.response);

    frame.id.response = true;
    frame.data[4..6].copy_from_slice(&250u16.to_be_bytes());
    device
        .send_to(&frame.encode(), listener.local_addr())
        .expect("echo");

    let deadline = Instant::now() + Duration::from_secs(2);
    while bridge_store.loco_state(DeviceUid(0x4711)).speed != 250 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(bridge_store.loco_state(DeviceUid(0x4711)).speed, 250);

    listener.stop();
}
