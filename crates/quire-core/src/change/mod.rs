//! Content-addressed, signed records and the DAG they form.
//!
//! - [`Cid`]: blake3 CIDv1 content ids.
//! - [`Permanode`]: immutable root identity of an object.
//! - [`Change`] / [`SignedChange`]: signed batch of datoms with causal
//!   parents and a Lamport time.
//! - [`body`]: interned CBOR encoding of the datom batch.
//! - [`ChangeDag`]: in-memory DAG of one object's changes.

pub mod body;
pub mod cid;
pub mod dag;
pub mod keys;
pub mod permanode;
pub mod record;

pub use cid::{Cid, Codec};
pub use dag::{ChangeDag, DagNode};
pub use keys::{AccountKey, DeviceKey, PublicKey};
pub use permanode::{DOCUMENT_TYPE, Permanode};
pub use record::{CHANGE_KIND, Change, SignedChange};

/// Lower-case, unpadded base32 used for every text form in this crate.
pub(crate) mod base32 {
    use crate::error::{Error, Result};

    /// Encode bytes.
    pub fn fmt(bytes: impl AsRef<[u8]>) -> String {
        let mut text = data_encoding::BASE32_NOPAD.encode(bytes.as_ref());
        text.make_ascii_lowercase();
        text
    }

    /// Decode text produced by [`fmt`]. Upper-case input is rejected so
    /// every value has exactly one text form.
    pub fn parse(input: &str) -> Result<Vec<u8>> {
        if input.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(Error::malformed("base32", "upper-case characters are not allowed"));
        }
        data_encoding::BASE32_NOPAD
            .decode(input.to_ascii_uppercase().as_bytes())
            .map_err(|e| Error::malformed("base32", e))
    }
}
