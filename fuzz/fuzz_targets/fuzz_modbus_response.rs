//! Fuzz target: `decode_read_response`
//!
//! Feeds arbitrary bytes to the Modbus-TCP response decoder as if they had
//! arrived from the meter.  The decoder must never panic, and anything it
//! accepts must be a well-formed single-register reply.
//!
//! cargo fuzz run fuzz_modbus_response

#![no_main]

use gridbalance::adapters::modbus::{decode_read_response, MBAP_HEADER_LEN};
use gridbalance::error::SensorError;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let (tid, unit) = match data {
        [a, b, c, ..] => (u16::from_be_bytes([*a, *b]), *c),
        _ => (1, 1),
    };
    let frame = data.get(3..).unwrap_or_default();

    match decode_read_response(frame, tid, unit) {
        Ok(value) => {
            assert_eq!(frame.len(), MBAP_HEADER_LEN + 4);
            assert_eq!(i16::from_be_bytes([frame[9], frame[10]]), value);
        }
        Err(SensorError::Exception(_)) => assert_eq!(frame.len(), MBAP_HEADER_LEN + 2),
        Err(_) => {}
    }
});
