//! Entity identifiers and their generator.
//!
//! A [`NodeId`] names anything addressable inside one object's graph: a
//! content block, or a synthetic position node minted by a move. Block ids
//! are usually derived from a short editor-assigned string, while position
//! nodes come from a [`NodeIdGenerator`].
//!
//! # Text form
//!
//! An id whose bytes are printable ASCII followed by zero padding prints as
//! that string. Any other id prints as `~` plus the unpadded URL-safe
//! base64 of all eight bytes. The encoded form is longer than
//! [`NODE_ID_SIZE`], so it never collides with a string id, and
//! [`NodeId::from_str`](std::str::FromStr::from_str) reads back both forms.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::op::ChangeKey;

/// Size of a [`NodeId`] in bytes.
pub const NODE_ID_SIZE: usize = 8;

/// Errors from building a [`NodeId`] out of caller input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeIdError {
    /// Empty strings can't name a node.
    #[error("node id must not be empty")]
    Empty,
    /// The string does not fit into [`NODE_ID_SIZE`] bytes.
    #[error("node id {0:?} is longer than {NODE_ID_SIZE} bytes")]
    TooLong(String),
    /// Raw bytes of the wrong length.
    #[error("node id must be {NODE_ID_SIZE} bytes, got {0}")]
    BadLength(usize),
    /// A `~` form that is not base64 of [`NODE_ID_SIZE`] bytes.
    #[error("node id {0:?} is not a valid encoded id")]
    BadEncoding(String),
}

const ENCODED_PREFIX: char = '~';

/// Identifier of a node within one object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId([u8; NODE_ID_SIZE]);

impl NodeId {
    /// The invalid all-zero id.
    pub const ZERO: Self = Self([0; NODE_ID_SIZE]);

    /// Top-level parent of every document.
    pub const ROOT: Self = Self(*b"$ROOT\0\0\0");

    /// Destination of deleted blocks.
    pub const TRASH: Self = Self(*b"$TRASH\0\0");

    /// Build an id by copying the bytes of a short string.
    ///
    /// # Errors
    ///
    /// Returns [`NodeIdError::Empty`] for `""` and [`NodeIdError::TooLong`]
    /// when `s` has more than [`NODE_ID_SIZE`] bytes.
    pub fn from_str_id(s: &str) -> Result<Self, NodeIdError> {
        if s.is_empty() {
            return Err(NodeIdError::Empty);
        }
        if s.len() > NODE_ID_SIZE {
            return Err(NodeIdError::TooLong(s.to_string()));
        }

        let mut out = [0u8; NODE_ID_SIZE];
        out[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Self(out))
    }

    /// Wrap raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; NODE_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build an id from a byte slice of exactly [`NODE_ID_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`NodeIdError::BadLength`] for any other length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, NodeIdError> {
        let arr: [u8; NODE_ID_SIZE] = bytes
            .try_into()
            .map_err(|_| NodeIdError::BadLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; NODE_ID_SIZE] {
        &self.0
    }

    /// Whether this is the invalid zero id.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Whether this is [`NodeId::ROOT`] or [`NodeId::TRASH`].
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        *self == Self::ROOT || *self == Self::TRASH
    }

    /// The string this id was built from, if it prints as one.
    fn as_text(&self) -> Option<&str> {
        let len = self.0.iter().position(|b| *b == 0).unwrap_or(NODE_ID_SIZE);
        let (text, padding) = self.0.split_at(len);
        let printable = !text.is_empty() && text.iter().all(u8::is_ascii_graphic);
        if printable && padding.iter().all(|b| *b == 0) {
            std::str::from_utf8(text).ok()
        } else {
            None
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) => f.write_str(text),
            None => write!(f, "{ENCODED_PREFIX}{}", data_encoding::BASE64URL_NOPAD.encode(&self.0)),
        }
    }
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    /// Parse the text form written by `Display`.
    fn from_str(s: &str) -> Result<Self, NodeIdError> {
        match s.strip_prefix(ENCODED_PREFIX) {
            Some(body) if s.len() > NODE_ID_SIZE => {
                let bytes = data_encoding::BASE64URL_NOPAD
                    .decode(body.as_bytes())
                    .map_err(|_| NodeIdError::BadEncoding(s.to_string()))?;
                Self::from_slice(&bytes).map_err(|_| NodeIdError::BadEncoding(s.to_string()))
            }
            _ => Self::from_str_id(s),
        }
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let buf = serde_bytes::ByteBuf::deserialize(deserializer)?;
            Self::from_slice(&buf).map_err(serde::de::Error::custom)
        }
    }
}

// ---------------------------------------------------------------------------
// NodeIdGenerator
// ---------------------------------------------------------------------------

/// Mints unique node ids for one replica.
///
/// Layout (big endian): 32 bits of unix seconds, 16 random session bits,
/// 16 counter bits. The session is re-drawn whenever the counter wraps, so
/// two ids from one generator never collide within the same second.
///
/// One generator is built per replica and threaded through call sites;
/// [`NodeIdGenerator::fork`] hands out independent children.
#[derive(Debug, Clone)]
pub struct NodeIdGenerator {
    rng: StdRng,
    session: u16,
    counter: u16,
}

impl NodeIdGenerator {
    /// Generator seeded from OS entropy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic generator for tests and simulation.
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut rng: StdRng) -> Self {
        let session = rng.r#gen();
        Self {
            rng,
            session,
            counter: 0,
        }
    }

    /// Derive an independent generator with its own session.
    #[must_use]
    pub fn fork(&mut self) -> Self {
        Self::from_seed(self.rng.next_u64())
    }

    /// Mint an id stamped with the current wall clock.
    pub fn mint(&mut self) -> NodeId {
        self.mint_at(Utc::now().timestamp())
    }

    /// Mint an id stamped with `unix_secs`.
    pub fn mint_at(&mut self, unix_secs: i64) -> NodeId {
        let secs = u32::try_from(unix_secs.clamp(0, i64::from(u32::MAX))).unwrap_or(u32::MAX);

        loop {
            let mut out = [0u8; NODE_ID_SIZE];
            out[..4].copy_from_slice(&secs.to_be_bytes());
            out[4..6].copy_from_slice(&self.session.to_be_bytes());
            out[6..].copy_from_slice(&self.counter.to_be_bytes());

            self.counter = self.counter.wrapping_add(1);
            if self.counter == 0 {
                self.session = self.rng.r#gen();
            }

            let id = NodeId(out);
            if !id.is_zero() && !id.is_reserved() {
                return id;
            }
        }
    }

    /// Random non-zero key for a draft change.
    pub fn mint_change_key(&mut self) -> ChangeKey {
        loop {
            let key = ChangeKey(self.rng.next_u64());
            if !key.is_zero() {
                return key;
            }
        }
    }

    /// Underlying RNG, for nonces and key generation.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

impl Default for NodeIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
