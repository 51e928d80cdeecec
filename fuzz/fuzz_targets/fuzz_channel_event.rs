#![no_main]

use libfuzzer_sys::fuzz_target;
use match_presence::protocol::ChannelEvent;

fuzz_target!(|data: &[u8]| {
    // Frames arrive from an untrusted presence server.
    if let Ok(event) = serde_json::from_slice::<ChannelEvent>(data) {
        // Anything that parses must serialize again.
        let _ = serde_json::to_string(&event);
    }

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = serde_json::from_str::<ChannelEvent>(s);
    }
});
