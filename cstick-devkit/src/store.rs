//! Canned record stores on temp files
//!
//! The sample rows follow the cStick capture shape: distance to ground,
//! grip pressure class, heart rate variability, glucose, oxygen saturation,
//! accelerometer class and the fall decision.

use std::io::{self, Write};

use tempfile::NamedTempFile;

/// Header line of the canonical capture.
pub const SAMPLE_HEADER: &str = "distance_cm,pressure,hrv,sugar_level,spo2,accelerometer,decision";

/// Three plausible capture rows: steady, wobbly, falling.
pub const SAMPLE_ROWS: &[&str] = &[
    "121.92,0,80,85,98.2,0,0",
    "45.72,1,112,140,95.1,1,1",
    "20.0,2,95,210,88.3,1,2",
];

/// Write a record store with the given header and rows to a temp file.
pub fn csv_store(header: &str, rows: &[&str]) -> io::Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, "{}", header)?;
    for row in rows {
        writeln!(file, "{}", row)?;
    }
    file.flush()?;
    Ok(file)
}

/// The canonical sample capture.
pub fn sample_store() -> io::Result<NamedTempFile> {
    csv_store(SAMPLE_HEADER, SAMPLE_ROWS)
}

/// A store with no content at all, not even a header.
pub fn empty_store() -> io::Result<NamedTempFile> {
    NamedTempFile::new()
}
