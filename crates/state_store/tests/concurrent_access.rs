use std::{collections::BTreeMap, sync::Arc, thread};

use event_bus::EventBus;
use shared::{
    domain::{DeviceUid, SWITCH_COUNT},
    protocol::Event,
};
use state_store::StateStore;

#[test]
fn parallel_writers_on_distinct_locos_do_not_interfere() {
    let store = Arc::new(StateStore::new(EventBus::new()));

    let writers: Vec<_> = (0..8u32)
        .map(|n| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for speed in 1..=200u16 {
                    store.set_loco_speed(DeviceUid(n), speed);
                    store
                        .set_loco_function(DeviceUid(n), (speed % 32) as u8, speed % 2 == 0)
                        .expect("function");
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().expect("writer");
    }

    let snapshot = store.snapshot();
    assert_eq!(snapshot.locos.len(), 8);
    for loco in snapshot.locos.values() {
        assert_eq!(loco.speed, 200);
    }
}

#[test]
fn late_subscriber_converges_to_final_state() {
    let store = Arc::new(StateStore::new(EventBus::new()));
    let uid = DeviceUid(0x4711);
    store.set_loco_speed(uid, 1);

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for speed in 2..=400u16 {
                store.set_loco_speed(uid, speed);
                store.set_switch(speed as usize % SWITCH_COUNT, (speed % 2) as u8).expect("switch");
            }
        })
    };

    let mut subscription = store.subscribe();
    writer.join().expect("writer");

    let mut speeds = BTreeMap::new();
    let mut switches = vec![0u8; SWITCH_COUNT];
    let mut first = None;
    while let Some(payload) = subscription.try_recv() {
        let event: Event = serde_json::from_str(&payload).expect("event json");
        first.get_or_insert_with(|| event.clone());
        match event {
            Event::Speed { loc_id, value } => {
                speeds.insert(loc_id, value);
            }
            Event::Switch { idx, value } => switches[idx] = value,
            _ => {}
        }
    }

    assert!(matches!(first, Some(Event::System { .. })));
    let snapshot = store.snapshot();
    assert_eq!(speeds.get(&uid), Some(&snapshot.locos[&uid].speed));
    assert_eq!(switches, snapshot.switches);
}
