use std::{
    io,
    sync::Mutex,
};

use codec::{decode_frame, Command, FRAME_LEN};
use event_bus::{EventBus, Subscription};
use serde_json::json;
use shared::protocol::Event;

use super::*;

#[derive(Default)]
struct RecordingSink {
    frames: Mutex<Vec<[u8; FRAME_LEN]>>,
}

impl RecordingSink {
    fn frames(&self) -> Vec<[u8; FRAME_LEN]> {
        self.frames.lock().expect("frames").clone()
    }
}

impl FrameSink for RecordingSink {
    fn send_frame(&self, frame: &[u8; FRAME_LEN]) -> io::Result<()> {
        self.frames.lock().expect("frames").push(*frame);
        Ok(())
    }
}

struct FailingSink;

impl FrameSink for FailingSink {
    fn send_frame(&self, _frame: &[u8; FRAME_LEN]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::ConnectionRefused, "no route"))
    }
}

fn dispatcher_with(sink: Arc<dyn FrameSink>) -> (Dispatcher, Subscription) {
    let store = Arc::new(StateStore::new(EventBus::new()));
    let live = store.bus().subscribe();
    (Dispatcher::new(store, sink), live)
}

fn drain(subscription: &mut Subscription) -> Vec<Event> {
    std::iter::from_fn(|| subscription.try_recv())
        .map(|payload| serde_json::from_str(&payload).expect("event json"))
        .collect()
}

#[test]
fn set_speed_updates_state_publishes_once_and_sends_speed_frame() {
    let sink = Arc::new(RecordingSink::default());
    let (dispatcher, mut live) = dispatcher_with(sink.clone());

    let intent = Intent::set_speed(Some(&json!(0x4711)), Some(&json!(300))).expect("intent");
    dispatcher.dispatch(intent).expect("dispatch");

    assert_eq!(dispatcher.store().loco_state(DeviceUid(0x4711)).speed, 300);
    assert_eq!(
        drain(&mut live),
        vec![Event::Speed {
            loc_id: DeviceUid(0x4711),
            value: 300
        }]
    );

    let frames = sink.frames();
    assert_eq!(frames.len(), 1);
    let frame = decode_frame(&frames[0]).expect("decode");
    assert_eq!(frame.id.command(), Some(Command::Speed));
    assert_eq!(frame.uid(), 0x4711);
    assert_eq!(u16::from_be_bytes([frame.data[4], frame.data[5]]), 300);
}

#[test]
fn toggle_system_sends_the_go_datagram() {
    let sink = Arc::new(RecordingSink::default());
    let (dispatcher, mut live) = dispatcher_with(sink.clone());

    dispatcher
        .dispatch(Intent::toggle_system(Some(&json!(true))).expect("intent"))
        .expect("dispatch");

    assert_eq!(dispatcher.store().system_state(), SystemState::Running);
    assert_eq!(drain(&mut live), vec![Event::System { status: 1 }]);
    assert_eq!(
        sink.frames(),
        vec![[0x00, 0x00, 0x03, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]]
    );
}

#[test]
fn unchanged_state_still_reaches_the_device() {
    let sink = Arc::new(RecordingSink::default());
    let (dispatcher, mut live) = dispatcher_with(sink.clone());

    let stop = Intent::toggle_system(Some(&json!("off"))).expect("intent");
    dispatcher.dispatch(stop).expect("dispatch");

    assert!(drain(&mut live).is_empty());
    assert_eq!(sink.frames().len(), 1);
}

#[test]
fn transmit_failure_keeps_applied_state() {
    let (dispatcher, mut live) = dispatcher_with(Arc::new(FailingSink));

    let intent = Intent::set_direction(Some(&json!(7)), Some(&json!("reverse"))).expect("intent");
    let err = dispatcher.dispatch(intent).expect_err("send fails");

    assert!(matches!(err, ControlError::TransmitFailure(_)));
    assert_eq!(
        dispatcher.store().loco_state(DeviceUid(7)).direction,
        Direction::Reverse
    );
    assert_eq!(
        drain(&mut live),
        vec![Event::Direction {
            loc_id: DeviceUid(7),
            value: 2
        }]
    );
}

#[test]
fn switch_frame_addresses_accessory_uid() {
    let sink = Arc::new(RecordingSink::default());
    let (dispatcher, _live) = dispatcher_with(sink.clone());

    dispatcher
        .dispatch(Intent::set_switch(Some(&json!(63)), Some(&json!(1))).expect("intent"))
        .expect("dispatch");

    assert_eq!(dispatcher.store().switch(63), Ok(1));
    let frame = decode_frame(&sink.frames()[0]).expect("decode");
    assert_eq!(frame.id.command(), Some(Command::Switch));
    assert_eq!(frame.uid(), ACCESSORY_BASE_UID + 63);
    assert_eq!(frame.data[4], 1);
    assert_eq!(frame.data[5], SWITCH_PROTOCOL_TAG);
}

#[test]
fn out_of_range_switch_is_rejected_before_sending() {
    let sink = Arc::new(RecordingSink::default());
    let (dispatcher, _live) = dispatcher_with(sink.clone());

    let intent = Intent::Switch {
        index: 64,
        value: 1,
    };
    let err = dispatcher.dispatch(intent).expect_err("out of range");
    assert!(matches!(
        err,
        ControlError::IndexOutOfRange { index: 64, limit: 64 }
    ));
    assert!(sink.frames().is_empty());
}

#[test]
fn function_intent_round_trip() {
    let sink = Arc::new(RecordingSink::default());
    let (dispatcher, mut live) = dispatcher_with(sink.clone());

    let intent =
        Intent::set_function(Some(&json!("16390")), Some(&json!(4)), Some(&json!("on")))
            .expect("intent");
    dispatcher.dispatch(intent).expect("dispatch");

    assert_eq!(
        dispatcher.store().loco_state(DeviceUid(16390)).functions.get(&4),
        Some(&true)
    );
    assert_eq!(
        drain(&mut live),
        vec![Event::Function {
            loc_id: DeviceUid(16390),
            function: 4,
            value: 1
        }]
    );
    let frame = decode_frame(&sink.frames()[0]).expect("decode");
    assert_eq!(frame.id.command(), Some(Command::Function));
    assert_eq!(&frame.data[4..6], &[4, 1]);
}

#[test]
fn invalid_target_is_reported_before_any_mutation() {
    let err = Intent::set_speed(Some(&json!("ICE")), Some(&json!(10))).expect_err("bad uid");
    assert!(matches!(err, ControlError::InvalidTarget(_)));

    let err = Intent::set_speed(None, Some(&json!(10))).expect_err("missing uid");
    assert!(matches!(err, ControlError::InvalidTarget(_)));
}

#[test]
fn hand_built_speed_intent_is_clamped_on_the_wire() {
    let sink = Arc::new(RecordingSink::default());
    let (dispatcher, mut live) = dispatcher_with(sink.clone());

    let intent = Intent::Speed {
        uid: DeviceUid(0x4711),
        speed: 5000,
    };
    dispatcher.dispatch(intent).expect("dispatch");

    assert_eq!(dispatcher.store().loco_state(DeviceUid(0x4711)).speed, 1023);
    assert_eq!(
        drain(&mut live),
        vec![Event::Speed {
            loc_id: DeviceUid(0x4711),
            value: 1023
        }]
    );
    let frame = decode_frame(&sink.frames()[0]).expect("decode");
    assert_eq!(u16::from_be_bytes([frame.data[4], frame.data[5]]), 1023);
}
