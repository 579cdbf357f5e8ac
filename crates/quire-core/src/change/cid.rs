//! Content ids.
//!
//! A [`Cid`] is a CIDv1 over a blake3-256 digest:
//!
//! ```text
//! varint(1) varint(codec) varint(0x1e) varint(32) digest[32]
//! ```
//!
//! Varints are unsigned LEB128 as produced by postcard for `u64`. The text
//! form is multibase base32 lower-case without padding (`b` prefix).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::base32;
use crate::error::{Error, Result};
use crate::model::ChangeKey;

const CID_VERSION: u64 = 1;
const BLAKE3_CODE: u64 = 0x1e;
const DIGEST_LEN: u64 = 32;

/// Multicodec of the content a [`Cid`] addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Codec {
    /// DAG-CBOR structured data (changes, permanodes).
    DagCbor,
    /// Opaque bytes.
    Raw,
}

impl Codec {
    /// Multicodec code.
    #[must_use]
    pub const fn code(self) -> u64 {
        match self {
            Self::DagCbor => 0x71,
            Self::Raw => 0x55,
        }
    }

    fn from_code(code: u64) -> Result<Self> {
        match code {
            0x71 => Ok(Self::DagCbor),
            0x55 => Ok(Self::Raw),
            other => Err(Error::malformed("cid", format!("unsupported codec 0x{other:x}"))),
        }
    }
}

/// Content id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid {
    codec: Codec,
    digest: [u8; 32],
}

impl Cid {
    /// Hash `bytes` into a content id.
    #[must_use]
    pub fn of(codec: Codec, bytes: &[u8]) -> Self {
        Self {
            codec,
            digest: *blake3::hash(bytes).as_bytes(),
        }
    }

    /// Codec of the addressed content.
    #[must_use]
    pub const fn codec(&self) -> Codec {
        self.codec
    }

    /// Raw blake3 digest.
    #[must_use]
    pub const fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Binary form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(36);
        for v in [CID_VERSION, self.codec.code(), BLAKE3_CODE, DIGEST_LEN] {
            write_varint(&mut out, v);
        }
        out.extend_from_slice(&self.digest);
        out
    }

    /// Parse one content id off the front of `bytes`, returning the rest.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] for truncated input, a version other than 1,
    /// an unknown codec, or a hash other than blake3-256.
    pub fn read_prefix(bytes: &[u8]) -> Result<(Self, &[u8])> {
        let (version, rest) = read_varint(bytes)?;
        if version != CID_VERSION {
            return Err(Error::malformed("cid", format!("unsupported version {version}")));
        }
        let (codec, rest) = read_varint(rest)?;
        let codec = Codec::from_code(codec)?;
        let (hash, rest) = read_varint(rest)?;
        let (len, rest) = read_varint(rest)?;
        if hash != BLAKE3_CODE || len != DIGEST_LEN {
            return Err(Error::malformed("cid", format!("unsupported hash 0x{hash:x}/{len}")));
        }
        if rest.len() < 32 {
            return Err(Error::malformed("cid", "truncated digest"));
        }
        let (digest, rest) = rest.split_at(32);
        let mut out = [0u8; 32];
        out.copy_from_slice(digest);
        Ok((Self { codec, digest: out }, rest))
    }

    /// Parse exactly one content id.
    ///
    /// # Errors
    ///
    /// Same as [`Cid::read_prefix`], plus trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (cid, rest) = Self::read_prefix(bytes)?;
        if !rest.is_empty() {
            return Err(Error::malformed("cid", format!("{} trailing bytes", rest.len())));
        }
        Ok(cid)
    }
}

impl From<Cid> for ChangeKey {
    /// First eight digest bytes, never zero.
    fn from(cid: Cid) -> Self {
        let mut head = [0u8; 8];
        head.copy_from_slice(&cid.digest[..8]);
        Self(u64::from_be_bytes(head).max(1))
    }
}

pub(crate) fn write_varint(out: &mut Vec<u8>, v: u64) {
    // Encoding a bare u64 into a Vec can't fail.
    if let Ok(bytes) = postcard::to_stdvec(&v) {
        out.extend_from_slice(&bytes);
    }
}

pub(crate) fn read_varint(bytes: &[u8]) -> Result<(u64, &[u8])> {
    postcard::take_from_bytes::<u64>(bytes).map_err(|e| Error::malformed("varint", e))
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", base32::fmt(self.to_bytes()))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({self})")
    }
}

impl FromStr for Cid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix('b')
            .ok_or_else(|| Error::malformed("cid", "expected multibase base32 ('b') prefix"))?;
        Self::from_bytes(&base32::parse(body)?)
    }
}

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            serializer.serialize_bytes(&self.to_bytes())
        }
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let buf = serde_bytes::ByteBuf::deserialize(deserializer)?;
            Self::from_bytes(&buf).map_err(serde::de::Error::custom)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
