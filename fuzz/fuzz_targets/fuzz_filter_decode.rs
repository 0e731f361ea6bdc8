//! Fuzz target for the JSON filter codec.
//!
//! Any input must either fail to decode or decode to a filter that survives
//! encoding and decoding again unchanged.
//!
//! Run with:
//! cargo +nightly fuzz run fuzz_filter_decode -- -max_total_time=600

#![no_main]

use ldapaccounts_connector::filter;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(decoded) = filter::decode(s) {
            let encoded = filter::encode(&decoded);
            let again = filter::decode(&encoded).unwrap();
            assert_eq!(decoded, again);
        }
    }
});
