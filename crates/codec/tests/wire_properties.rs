use codec::{build_can_id, decode_frame, encode_frame, hash, CanId, Command};

fn sample_uids() -> impl Iterator<Item = u32> {
    let edges = [0, 1, 0x7F, 0x80, 0xFFFF, 0x1_0000, 0x4711, 0xC000_0001, u32::MAX];
    let stride = (0..=u32::MAX).step_by(0x0001_0F1D);
    edges.into_iter().chain(stride)
}

#[test]
fn hash_always_carries_discriminator_bits() {
    for uid in sample_uids() {
        let h = hash(uid);
        assert_eq!(h & 0x0080, 0, "bit 7 set for uid {uid:#x}");
        assert_eq!(h & 0x0300, 0x0300, "bits 8-9 clear for uid {uid:#x}");
    }
}

#[test]
fn hash_is_deterministic() {
    for uid in sample_uids() {
        assert_eq!(hash(uid), hash(uid));
    }
}

#[test]
fn frames_round_trip_for_every_command() {
    let commands = [
        Command::System,
        Command::Discovery,
        Command::Bind,
        Command::Verify,
        Command::Speed,
        Command::Direction,
        Command::Function,
        Command::ReadConfig,
        Command::WriteConfig,
        Command::Switch,
    ];
    for (i, command) in commands.into_iter().enumerate() {
        let can_id = build_can_id(0x4711 + i as u32, command, i as u8, i % 2 == 1);
        let payload = [0xA5u8; 3];
        let bytes = encode_frame(can_id, &payload, 8).expect("encode");
        let frame = decode_frame(&bytes).expect("decode");

        assert_eq!(frame.id.to_raw(), can_id);
        assert_eq!(frame.id.command(), Some(command));
        assert_eq!(frame.id.response, i % 2 == 1);
        assert_eq!(frame.dlc, 8);
        assert_eq!(frame.data, [0xA5, 0xA5, 0xA5, 0, 0, 0, 0, 0]);
        assert_eq!(CanId::from_raw(can_id).hash, hash(0x4711 + i as u32));
    }
}
