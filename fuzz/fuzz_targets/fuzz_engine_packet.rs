#![no_main]

use awaz_pulse_realtime::protocol::{EnginePacket, Handshake};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = std::str::from_utf8(data) else {
        return;
    };

    // Whatever decodes must encode back to the same frame.
    if let Ok(packet) = EnginePacket::decode(frame) {
        if let EnginePacket::Open(payload) = &packet {
            let _ = serde_json::from_str::<Handshake>(payload);
        }
        let encoded = packet.encode();
        assert_eq!(EnginePacket::decode(&encoded).ok(), Some(packet));
    }
});
