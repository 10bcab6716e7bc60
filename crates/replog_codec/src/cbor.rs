//! CBOR encoding and decoding.

use crate::error::{CodecError, CodecResult};
use crate::value::{Document, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes any serializable value to CBOR bytes.
///
/// The encoding is deterministic: the same value always yields the same
/// bytes, which is what the `_id` keys and integrity checks rely on.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(value, &mut buffer)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buffer)
}

/// Decodes a value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR for `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

impl Value {
    /// Returns the CBOR encoding of this value, used as an equality key.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn key_bytes(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }
}

impl crate::Encode for Document {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }
}

impl crate::Decode for Document {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}
