#![no_main]

use awaz_pulse_realtime::event::ServerEvent;
use awaz_pulse_realtime::protocol::SocketPacket;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(payload) = std::str::from_utf8(data) else {
        return;
    };

    // Exercise the full inbound path: packet framing, then event payloads.
    if let Ok(packet) = SocketPacket::decode(payload) {
        if let Some(name) = packet.event_name() {
            let _ = ServerEvent::decode(name, packet.event_payload());
        }
        let _ = SocketPacket::decode(&packet.encode());
    }
});
