//! # replog codec
//!
//! The structured document model carried by oplog entries, and its CBOR
//! wire encoding.
//!
//! The replication core treats documents as opaque: it reads a handful of
//! well-known fields (`_id`, command names, update operators) and otherwise
//! passes documents through untouched.
//!
//! ## Usage
//!
//! ```
//! use replog_codec::{Decode, Document, Encode, Value};
//!
//! let doc = Document::new().with("_id", 1).with("name", "Ada");
//! let bytes = doc.encode().unwrap();
//! let decoded = Document::decode(&bytes).unwrap();
//! assert_eq!(decoded.get("name"), Some(&Value::Text("Ada".into())));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod value;

pub use cbor::{from_cbor, to_cbor};
pub use error::{CodecError, CodecResult};
pub use value::{Document, Value};

/// Trait for types that can be encoded to CBOR.
pub trait Encode {
    /// Encode this value to CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}
