#![no_main]

use libfuzzer_sys::fuzz_target;
use quire_core::SignedChange;

// Arbitrary bytes must never panic the decoder or the verifier.
fuzz_target!(|data: &[u8]| {
    let _ = SignedChange::from_bytes(data.to_vec());
    if let Ok(change) = SignedChange::from_bytes_unverified(data.to_vec()) {
        let _ = change.datoms();
    }
});
