//! Datoms: typed entity/attribute/value facts stamped with an [`OpId`].

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::node_id::NodeId;
use super::op::{ChangeKey, OpId, Origin};
use crate::change::Cid;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Attribute
// ---------------------------------------------------------------------------

/// Predicate name of a datom, e.g. `quire.document/title`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attribute(Cow<'static, str>);

impl Attribute {
    /// Attribute backed by a static string.
    #[must_use]
    pub const fn from_static(s: &'static str) -> Self {
        Self(Cow::Borrowed(s))
    }

    /// Attribute from an owned string (decoded from a change body).
    #[must_use]
    pub const fn from_string(s: String) -> Self {
        Self(Cow::Owned(s))
    }

    /// String form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// Closed set of value types a datom can carry. The discriminant is the
/// on-wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueType {
    /// Reference to another entity.
    Ref = 0,
    /// UTF-8 string.
    String = 1,
    /// Signed integer.
    Int = 2,
    /// Boolean.
    Bool = 3,
    /// Opaque bytes.
    Bytes = 4,
    /// Content id.
    Cid = 5,
    /// Canonical CBOR document.
    Structured = 6,
}

impl TryFrom<i64> for ValueType {
    type Error = Error;

    fn try_from(tag: i64) -> Result<Self> {
        Ok(match tag {
            0 => Self::Ref,
            1 => Self::String,
            2 => Self::Int,
            3 => Self::Bool,
            4 => Self::Bytes,
            5 => Self::Cid,
            6 => Self::Structured,
            other => return Err(Error::malformed("value type", format!("unknown tag {other}"))),
        })
    }
}

/// Value of a datom.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Reference to another entity.
    Ref(NodeId),
    /// UTF-8 string.
    String(String),
    /// Signed integer.
    Int(i64),
    /// Boolean.
    Bool(bool),
    /// Opaque bytes.
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    /// Content id.
    Cid(Cid),
    /// Canonical CBOR document.
    Structured(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl Value {
    /// Encode any serializable value as a [`Value::Structured`] CBOR blob.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the value can't be encoded.
    pub fn structured<T: Serialize>(value: &T) -> Result<Self> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(value, &mut out)
            .map_err(|e| Error::malformed("structured value", e))?;
        Ok(Self::Structured(out))
    }

    /// Tag of this value.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Ref(_) => ValueType::Ref,
            Self::String(_) => ValueType::String,
            Self::Int(_) => ValueType::Int,
            Self::Bool(_) => ValueType::Bool,
            Self::Bytes(_) => ValueType::Bytes,
            Self::Cid(_) => ValueType::Cid,
            Self::Structured(_) => ValueType::Structured,
        }
    }

    /// Referenced entity, if this is a [`Value::Ref`].
    #[must_use]
    pub const fn as_node(&self) -> Option<NodeId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// String payload, if this is a [`Value::String`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Byte payload, if this is a [`Value::Bytes`].
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<NodeId> for Value {
    fn from(id: NodeId) -> Self {
        Self::Ref(id)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl From<Cid> for Value {
    fn from(c: Cid) -> Self {
        Self::Cid(c)
    }
}

// ---------------------------------------------------------------------------
// Datom
// ---------------------------------------------------------------------------

/// One fact about an entity within an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Datom {
    /// Operation id.
    pub op: OpId,
    /// Subject.
    pub entity: NodeId,
    /// Predicate.
    pub attribute: Attribute,
    /// Object.
    pub value: Value,
}

impl Datom {
    /// Tag of the carried value.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        self.value.value_type()
    }
}

/// Mints datoms for one change.
///
/// The sequence counter is incremented before each datom is created, so
/// the first datom of a fresh factory gets seq 1.
#[derive(Debug, Clone)]
pub struct DatomFactory {
    lamport: u64,
    origin: Origin,
    change: ChangeKey,
    seq: u32,
}

impl DatomFactory {
    /// Factory continuing after `seq`.
    #[must_use]
    pub const fn new(lamport: u64, origin: Origin, change: ChangeKey, seq: u32) -> Self {
        Self {
            lamport,
            origin,
            change,
            seq,
        }
    }

    /// Create the next datom.
    pub fn mint(&mut self, entity: NodeId, attribute: Attribute, value: impl Into<Value>) -> Datom {
        self.seq = self.seq.saturating_add(1);
        Datom {
            op: OpId::new(self.lamport, self.origin, self.change, self.seq),
            entity,
            attribute,
            value: value.into(),
        }
    }

    /// Lamport time stamped on every datom.
    #[must_use]
    pub const fn lamport(&self) -> u64 {
        self.lamport
    }

    /// Change key stamped on every datom.
    #[must_use]
    pub const fn change(&self) -> ChangeKey {
        self.change
    }

    /// Origin stamped on every datom.
    #[must_use]
    pub const fn origin(&self) -> Origin {
        self.origin
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_increments_seq_before_minting() {
        let mut f = DatomFactory::new(4, Origin(1), ChangeKey(2), 0);
        let a = f.mint(NodeId::ROOT, Attribute::from_static("t/a"), "x");
        let b = f.mint(NodeId::ROOT, Attribute::from_static("t/a"), 5_i64);
        assert_eq!(a.op.seq, 1);
        assert_eq!(b.op.seq, 2);
        assert_eq!(a.op.lamport, 4);
        assert_eq!(b.value_type(), ValueType::Int);
    }

    #[test]
    fn value_tags_round_trip() {
        for tag in 0..=6_i64 {
            let vt = ValueType::try_from(tag).expect("known tag");
            assert_eq!(vt as i64, tag);
        }
        assert!(ValueType::try_from(7).is_err());
        assert!(ValueType::try_from(-1).is_err());
    }

    #[test]
    fn structured_values_are_cbor() {
        let v = Value::structured(&vec![1_u32, 2, 3]).expect("encodes");
        let Value::Structured(bytes) = &v else {
            panic!("expected structured value");
        };
        let back: Vec<u32> = ciborium::de::from_reader(bytes.as_slice()).expect("decodes");
        assert_eq!(back, vec![1, 2, 3]);
        assert_eq!(v.value_type(), ValueType::Structured);
    }

    #[test]
    fn accessors_match_variant() {
        let id = NodeId::from_str_id("b1").expect("valid");
        assert_eq!(Value::from(id).as_node(), Some(id));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert_eq!(Value::from(&b"hi"[..]).as_bytes(), Some(&b"hi"[..]));
        assert_eq!(Value::from(true).as_node(), None);
    }

    #[test]
    fn attributes_compare_by_content() {
        let a = Attribute::from_static("quire.document/title");
        let b = Attribute::from_string("quire.document/title".to_string());
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "quire.document/title");
    }
}
