//! cStick record schema and CSV line decoding
//!
//! A record is one line of the capture file: seven comma-separated values
//! positionally bound to the sensor schema below. Values stay opaque text;
//! the agent never interprets them numerically.

/// Number of fields in a well-formed cStick record.
pub const FIELD_COUNT: usize = 7;

/// Field delimiter used by the capture file.
pub const DELIMITER: char = ',';

/// Schema keys in wire order; field N of a record binds to key N.
pub const SCHEMA_KEYS: [&str; FIELD_COUNT] = [
    "distance_cm",
    "pressure",
    "hrv",
    "sugar_level",
    "spo2",
    "accelerometer",
    "decision",
];

/// Split a trimmed record line into its fields.
///
/// The split stops after [`FIELD_COUNT`] pieces, so extra delimiters end up
/// inside the last field instead of producing an eighth one. Lines with fewer
/// delimiters yield fewer fields; arity is checked at encode time.
pub fn decode_line(line: &str) -> Vec<&str> {
    line.splitn(FIELD_COUNT, DELIMITER).collect()
}
