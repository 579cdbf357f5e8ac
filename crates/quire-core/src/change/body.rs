//! Change body codec.
//!
//! A body is a CBOR map of interned tables plus one row per datom:
//!
//! | key | content |
//! |-----|---------|
//! | `e` | entities (node ids) |
//! | `s` | strings |
//! | `b` | byte strings (bytes and structured values) |
//! | `a` | attribute names |
//! | `c` | content ids |
//! | `d` | rows `[seq, entity, attribute, value_type, payload]` |
//!
//! The payload is a table index for interned values, the integer itself for
//! `Int`, and `0`/`1` for `Bool`. Empty tables are omitted. Lamport time,
//! origin and change key are not stored per datom; they come from the
//! enclosing change.

use std::collections::HashMap;
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use super::cid::Cid;
use crate::error::{Error, Result};
use crate::model::{Attribute, ChangeKey, Datom, NodeId, OpId, Origin, Value, ValueType};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Body {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    e: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    s: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    b: Vec<ByteBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    a: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    c: Vec<Cid>,
    #[serde(default)]
    d: Vec<[i64; 5]>,
}

struct Interner<K> {
    index: HashMap<K, i64>,
    items: Vec<K>,
}

impl<K: Hash + Eq + Clone> Interner<K> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            items: Vec::new(),
        }
    }

    fn intern(&mut self, key: &K) -> Result<i64> {
        if let Some(i) = self.index.get(key) {
            return Ok(*i);
        }
        let i = i64::try_from(self.items.len()).map_err(|e| Error::malformed("change body", e))?;
        self.index.insert(key.clone(), i);
        self.items.push(key.clone());
        Ok(i)
    }
}

/// Encode datoms of one change. Only `seq` is kept from each op.
///
/// # Errors
///
/// [`Error::Malformed`] if encoding fails.
pub fn encode(datoms: &[Datom]) -> Result<Vec<u8>> {
    let mut entities = Interner::new();
    let mut strings = Interner::new();
    let mut bytes = Interner::new();
    let mut attrs = Interner::new();
    let mut cids = Interner::new();

    let mut rows = Vec::with_capacity(datoms.len());
    for d in datoms {
        let entity = entities.intern(&d.entity)?;
        let attr = attrs.intern(&d.attribute.as_str().to_string())?;
        let payload = match &d.value {
            Value::Ref(n) => entities.intern(n)?,
            Value::String(s) => strings.intern(s)?,
            Value::Int(v) => *v,
            Value::Bool(v) => i64::from(*v),
            Value::Bytes(b) | Value::Structured(b) => bytes.intern(b)?,
            Value::Cid(c) => cids.intern(c)?,
        };
        rows.push([
            i64::from(d.op.seq),
            entity,
            attr,
            d.value_type() as i64,
            payload,
        ]);
    }

    let body = Body {
        e: entities.items,
        s: strings.items,
        b: bytes.items.into_iter().map(ByteBuf::from).collect(),
        a: attrs.items,
        c: cids.items,
        d: rows,
    };

    let mut out = Vec::new();
    ciborium::ser::into_writer(&body, &mut out).map_err(|e| Error::malformed("change body", e))?;
    Ok(out)
}

fn lookup<'a, T>(table: &'a [T], idx: i64, what: &str) -> Result<&'a T> {
    usize::try_from(idx)
        .ok()
        .and_then(|i| table.get(i))
        .ok_or_else(|| Error::malformed("change body", format!("{what} index {idx} out of range")))
}

/// Decode a body, stamping every datom with the change's lamport time,
/// origin, and key.
///
/// # Errors
///
/// [`Error::Malformed`] for undecodable bytes, out-of-range indices,
/// unknown value tags, bad booleans, or seqs that are not strictly
/// increasing.
pub fn decode(bytes: &[u8], lamport: u64, origin: Origin, change: ChangeKey) -> Result<Vec<Datom>> {
    let body: Body =
        ciborium::de::from_reader(bytes).map_err(|e| Error::malformed("change body", e))?;

    let mut out = Vec::with_capacity(body.d.len());
    let mut last_seq = 0u32;
    for [seq, entity, attr, tag, payload] in body.d {
        let seq = u32::try_from(seq)
            .map_err(|_| Error::malformed("change body", format!("seq {seq} out of range")))?;
        if seq <= last_seq {
            return Err(Error::malformed(
                "change body",
                format!("seq {seq} does not follow {last_seq}"),
            ));
        }
        last_seq = seq;

        let entity = *lookup(&body.e, entity, "entity")?;
        let attribute = Attribute::from_string(lookup(&body.a, attr, "attribute")?.clone());
        let value = match ValueType::try_from(tag)? {
            ValueType::Ref => Value::Ref(*lookup(&body.e, payload, "ref")?),
            ValueType::String => Value::String(lookup(&body.s, payload, "string")?.clone()),
            ValueType::Int => Value::Int(payload),
            ValueType::Bool => match payload {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => {
                    return Err(Error::malformed("change body", format!("bad bool {other}")));
                }
            },
            ValueType::Bytes => Value::Bytes(lookup(&body.b, payload, "bytes")?.to_vec()),
            ValueType::Cid => Value::Cid(*lookup(&body.c, payload, "cid")?),
            ValueType::Structured => Value::Structured(lookup(&body.b, payload, "structured")?.to_vec()),
        };

        out.push(Datom {
            op: OpId::new(lamport, origin, change, seq),
            entity,
            attribute,
            value,
        });
    }

    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
