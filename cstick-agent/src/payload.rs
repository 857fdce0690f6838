//! Fixed-schema payload encoding with a bounded buffer
//!
//! The wire format is the one the capture consumers already parse: a single
//! JSON-style object whose keys are quoted and whose values are substituted
//! verbatim, unquoted. Numeric fields therefore produce valid JSON; anything
//! else passes through untouched.

use thiserror::Error;

use crate::record::{FIELD_COUNT, SCHEMA_KEYS};

/// Default capacity of an outgoing payload, in bytes.
pub const DEFAULT_CAPACITY: usize = 512;

/// Payload encoding failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// The record did not carry exactly one value per schema key.
    #[error("record has {got} fields, schema needs {expected}")]
    ArityMismatch { expected: usize, got: usize },
    /// The encoded message would not fit the payload capacity.
    #[error("payload needs at least {len} bytes, capacity is {cap}")]
    TooLarge { len: usize, cap: usize },
}

/// Append-only text buffer that refuses to grow past a fixed capacity.
///
/// Oversized messages fail loudly instead of being silently cut at the limit.
#[derive(Debug)]
pub struct PayloadBuffer {
    buf: String,
    cap: usize,
}

impl PayloadBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: String::new(),
            cap,
        }
    }

    /// Append `text`, failing when the result would exceed the capacity.
    pub fn push(&mut self, text: &str) -> Result<(), EncodeError> {
        let len = self.buf.len() + text.len();
        if len > self.cap {
            return Err(EncodeError::TooLarge { len, cap: self.cap });
        }
        self.buf.push_str(text);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Consume the buffer, yielding the accumulated text.
    pub fn into_string(self) -> String {
        self.buf
    }
}

/// Encode one decoded record into the wire payload.
///
/// Key order follows [`SCHEMA_KEYS`]; values are inserted verbatim. Fails
/// when the record arity does not match the schema or when the message would
/// exceed `cap` bytes.
pub fn encode_payload(fields: &[&str], cap: usize) -> Result<String, EncodeError> {
    if fields.len() != FIELD_COUNT {
        return Err(EncodeError::ArityMismatch {
            expected: FIELD_COUNT,
            got: fields.len(),
        });
    }

    let mut out = PayloadBuffer::new(cap);
    out.push("{")?;
    for (i, (key, value)) in SCHEMA_KEYS.iter().zip(fields).enumerate() {
        if i > 0 {
            out.push(", ")?;
        }
        out.push("\"")?;
        out.push(key)?;
        out.push("\": ")?;
        out.push(value)?;
    }
    out.push("}")?;
    Ok(out.into_string())
}
