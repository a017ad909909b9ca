#![no_main]

use arx_core::Packet;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Packet parsing must never panic on arbitrary input, and anything
    // that parses must re-encode to the exact same frame.
    if let Ok(packet) = Packet::decode(data) {
        assert_eq!(packet.encode(), data);
    }
});
