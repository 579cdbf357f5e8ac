#![no_main]

use libfuzzer_sys::fuzz_target;
use quire_core::{Document, OpOrder, SignedChange};

// Any datoms that decode from an unverified change replay into an error or
// a document, never a panic.
fuzz_target!(|data: &[u8]| {
    let Ok(change) = SignedChange::from_bytes_unverified(data.to_vec()) else {
        return;
    };
    let Ok(mut datoms) = change.datoms() else {
        return;
    };
    let order = OpOrder::OriginTieBreak;
    if order.sort_by_op(&mut datoms, |d| d.op).is_err() {
        return;
    }
    let mut doc = Document::new(order);
    if doc.replay(&datoms).is_ok() {
        let _ = doc.snapshot();
    }
});
