#![no_main]

use libfuzzer_sys::fuzz_target;

use shellcache::store::fuzzing::parse_persisted_entry;

fuzz_target!(|data: &[u8]| {
    let _ = parse_persisted_entry(data);
});
