#![no_main]

use libfuzzer_sys::fuzz_target;
use quire_core::Version;

fuzz_target!(|data: &[u8]| {
    let Ok(token) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(version) = token.parse::<Version>() {
        let again: Version = version.to_string().parse().expect("canonical token parses");
        assert_eq!(again, version);
    }
});
