//! Record value encoding for batch files.
//!
//! Text formats (delimited text and JSON) get one record per line, so a
//! trailing newline is appended unless the payload already ends with one.
//! Binary formats are written byte-for-byte.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, SinkError};
use crate::ingestion::{DataFormat, ValueClass};
use crate::record::RecordValue;

/// Encode one record value for `format`.
///
/// Fails with [`SinkError::FormatMismatch`] when the value shape cannot be
/// represented: null values in any format, structured values in delimited
/// text, and anything but raw bytes in binary formats.
pub fn encode_value(format: DataFormat, value: &RecordValue) -> Result<Bytes> {
    let mismatch = || SinkError::FormatMismatch {
        format: format.as_str().to_string(),
        found: value.shape().to_string(),
    };

    match (format.value_class(), value) {
        (_, RecordValue::Null) => Err(mismatch()),
        (ValueClass::Binary, RecordValue::Bytes(b)) => Ok(b.clone()),
        (ValueClass::Binary, _) => Err(mismatch()),
        (ValueClass::DelimitedText, RecordValue::Structured(_)) => Err(mismatch()),
        (_, RecordValue::Bytes(b)) => Ok(line(b)),
        (_, RecordValue::String(s)) => Ok(line(s.as_bytes())),
        (ValueClass::Json, RecordValue::Structured(v)) => {
            let mut buf = serde_json::to_vec(v)?;
            buf.push(b'\n');
            Ok(Bytes::from(buf))
        }
    }
}

fn line(payload: &[u8]) -> Bytes {
    if payload.last() == Some(&b'\n') {
        return Bytes::copy_from_slice(payload);
    }
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    buf.put_slice(payload);
    buf.put_u8(b'\n');
    buf.freeze()
}
