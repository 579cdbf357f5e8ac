//! Permanodes: the immutable identity of an object.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::cid::{Cid, Codec};
use super::keys::PublicKey;
use crate::error::{Error, Result};

/// Object type of documents.
pub const DOCUMENT_TYPE: &str = "quire/document";

/// Root record of an object. Its content id is the object id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permanode {
    /// Object type, e.g. [`DOCUMENT_TYPE`].
    pub object_type: String,
    /// Owning account.
    pub owner: PublicKey,
    /// Creation time in unix microseconds.
    pub create_time: i64,
    /// Random bytes making two permanodes with equal fields distinct.
    #[serde(with = "serde_bytes")]
    pub nonce: [u8; 8],
}

impl Permanode {
    /// New document permanode with a nonce drawn from `rng`.
    pub fn document<R: RngCore + ?Sized>(owner: PublicKey, create_time: i64, rng: &mut R) -> Self {
        let mut nonce = [0u8; 8];
        rng.fill_bytes(&mut nonce);
        Self {
            object_type: DOCUMENT_TYPE.to_string(),
            owner,
            create_time,
            nonce,
        }
    }

    /// Canonical CBOR encoding.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] if encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(self, &mut out).map_err(|e| Error::malformed("permanode", e))?;
        Ok(out)
    }

    /// Parse a permanode blob.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] if the bytes are not a permanode.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| Error::malformed("permanode", e))
    }

    /// Object id.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] if encoding fails.
    pub fn id(&self) -> Result<Cid> {
        Ok(Cid::of(Codec::DagCbor, &self.encode()?))
    }
}
