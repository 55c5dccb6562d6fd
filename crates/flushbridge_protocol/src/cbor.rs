//! CBOR helpers shared by every envelope type.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a serializable value to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|e| ProtocolError::encoding_failed(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a value from CBOR bytes.
///
/// Trailing bytes after the first item are rejected.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    let mut reader = bytes;
    let value = ciborium::de::from_reader(&mut reader)
        .map_err(|e| ProtocolError::decoding_failed(e.to_string()))?;
    if !reader.is_empty() {
        return Err(ProtocolError::decoding_failed(format!(
            "{} trailing bytes after envelope",
            reader.len()
        )));
    }
    Ok(value)
}
