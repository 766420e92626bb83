#![no_main]
use duologwal::record;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // decode must be total on adversarial input: never panic, never read
    // past `data`, and only ever fail with a framing error.
    if let Ok(view) = record::decode(data) {
        let _ = record::verify_checksum(&view);
    }
});
