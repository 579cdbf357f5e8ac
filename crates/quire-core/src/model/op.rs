//! Operation ids and their ordering.
//!
//! Every datom carries an [`OpId`]. All CRDT decisions (which LWW write
//! wins, where a list element lands, in which order moves apply) reduce to
//! comparing two op ids under an [`OpOrder`] policy.
//!
//! # Policies
//!
//! - [`OpOrder::Strict`]: lamport time first, then seq within one change.
//!   Ops from two different changes at the same lamport time cannot be
//!   ordered without walking the change DAG, so the comparison fails with
//!   [`OrderError::Concurrent`].
//! - [`OpOrder::OriginTieBreak`]: lamport time, then device origin, then
//!   change key, then seq. Every pair of distinct ops is ordered.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Origin / ChangeKey
// ---------------------------------------------------------------------------

/// Abbreviated device identifier: the first 8 bytes of the device key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Origin(pub u64);

impl Origin {
    /// Abbreviate a 32-byte public key.
    #[must_use]
    pub fn from_key_bytes(key: &[u8; 32]) -> Self {
        let mut head = [0u8; 8];
        head.copy_from_slice(&key[..8]);
        Self(u64::from_be_bytes(head))
    }
}

/// Identifies the change an op belongs to.
///
/// Published changes derive it from their content id; drafts use a random
/// key. Zero means "no change" and marks the zero [`OpId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ChangeKey(pub u64);

impl ChangeKey {
    /// Whether this is the zero key.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

// ---------------------------------------------------------------------------
// OpId
// ---------------------------------------------------------------------------

/// Logical id of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OpId {
    /// Lamport time of the owning change.
    pub lamport: u64,
    /// Device that produced the change.
    pub origin: Origin,
    /// The owning change.
    pub change: ChangeKey,
    /// Position within the change, starting at 1.
    pub seq: u32,
}

impl OpId {
    /// The "no operation yet" value.
    pub const ZERO: Self = Self {
        lamport: 0,
        origin: Origin(0),
        change: ChangeKey(0),
        seq: 0,
    };

    /// Build an op id.
    #[must_use]
    pub const fn new(lamport: u64, origin: Origin, change: ChangeKey, seq: u32) -> Self {
        Self {
            lamport,
            origin,
            change,
            seq,
        }
    }

    /// Whether this is [`OpId::ZERO`].
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.change.is_zero()
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{:016x}/{:016x}#{}",
            self.lamport, self.origin.0, self.change.0, self.seq
        )
    }
}

// ---------------------------------------------------------------------------
// OpOrder
// ---------------------------------------------------------------------------

/// Failed op comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    /// Ops from different changes at the same lamport time.
    #[error("ops {a} and {b} are concurrent")]
    Concurrent {
        /// First op.
        a: OpId,
        /// Second op.
        b: OpId,
    },
    /// An op compared with itself.
    #[error("op {0} compared with itself")]
    Equal(OpId),
}

/// Comparison policy for op ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OpOrder {
    /// Refuse to order concurrent ops from different changes.
    #[default]
    #[serde(rename = "strict")]
    Strict,
    /// Break lamport ties by origin, then change key.
    #[serde(rename = "origin-tiebreak")]
    OriginTieBreak,
}

impl OpOrder {
    /// Compare two ops.
    ///
    /// The zero op sorts before every real op.
    ///
    /// # Errors
    ///
    /// [`OrderError::Equal`] for identical ops, and under
    /// [`OpOrder::Strict`] [`OrderError::Concurrent`] for ops from
    /// different changes with the same lamport time.
    pub fn compare(self, a: &OpId, b: &OpId) -> Result<Ordering, OrderError> {
        match (a.is_zero(), b.is_zero()) {
            (true, true) => return Err(OrderError::Equal(*a)),
            (true, false) => return Ok(Ordering::Less),
            (false, true) => return Ok(Ordering::Greater),
            (false, false) => {}
        }

        match a.lamport.cmp(&b.lamport) {
            Ordering::Equal => {}
            other => return Ok(other),
        }

        let same_change = a.origin == b.origin && a.change == b.change;
        if !same_change {
            match self {
                Self::Strict => return Err(OrderError::Concurrent { a: *a, b: *b }),
                Self::OriginTieBreak => {
                    let tie = a
                        .origin
                        .cmp(&b.origin)
                        .then_with(|| a.change.cmp(&b.change));
                    return Ok(tie);
                }
            }
        }

        match a.seq.cmp(&b.seq) {
            Ordering::Equal => Err(OrderError::Equal(*a)),
            other => Ok(other),
        }
    }

    /// `a < b` under this policy.
    ///
    /// # Errors
    ///
    /// See [`OpOrder::compare`].
    pub fn less(self, a: &OpId, b: &OpId) -> Result<bool, OrderError> {
        Ok(self.compare(a, b)? == Ordering::Less)
    }

    /// Sort ops (or things keyed by ops) in place.
    ///
    /// The whole slice is checked for comparability first, so the slice is
    /// left untouched on error.
    ///
    /// # Errors
    ///
    /// [`OrderError::Equal`] if two items share an op, and under
    /// [`OpOrder::Strict`] [`OrderError::Concurrent`] if two changes share a
    /// lamport time.
    pub fn sort_by_op<T>(self, items: &mut [T], key: impl Fn(&T) -> OpId) -> Result<(), OrderError> {
        let mut seen: HashSet<OpId> = HashSet::with_capacity(items.len());
        let mut change_at: HashMap<u64, OpId> = HashMap::new();

        for item in items.iter() {
            let op = key(item);
            if !seen.insert(op) {
                return Err(OrderError::Equal(op));
            }
            if self == Self::Strict {
                let first = *change_at.entry(op.lamport).or_insert(op);
                if first.origin != op.origin || first.change != op.change {
                    return Err(OrderError::Concurrent { a: first, b: op });
                }
            }
        }

        // With comparability established the tuple key agrees with
        // `compare` under both policies.
        items.sort_by_key(|item| {
            let op = key(item);
            (op.lamport, op.origin, op.change, op.seq)
        });
        Ok(())
    }
}

impl fmt::Display for OpOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => f.write_str("strict"),
            Self::OriginTieBreak => f.write_str("origin-tiebreak"),
        }
    }
}

impl FromStr for OpOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "origin-tiebreak" | "tiebreak" => Ok(Self::OriginTieBreak),
            other => Err(format!("unknown op order policy {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// OpTracker
// ---------------------------------------------------------------------------

/// Monotonic guard over the ops applied to one projection.
#[derive(Debug, Clone, Default)]
pub struct OpTracker {
    order: OpOrder,
    last: OpId,
}

impl OpTracker {
    /// Empty tracker using `order`.
    #[must_use]
    pub const fn new(order: OpOrder) -> Self {
        Self {
            order,
            last: OpId::ZERO,
        }
    }

    /// Accept `op` if it is strictly newer than the last tracked op.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfOrderOperation`] when `op` is not strictly greater
    /// (including the zero op and a repeat of the last op), and
    /// [`Error::ConcurrentOperations`] when the policy can't order them.
    pub fn track(&mut self, op: OpId) -> Result<()> {
        let out_of_order = Error::OutOfOrderOperation {
            last: self.last,
            incoming: op,
        };

        if op.is_zero() {
            return Err(out_of_order);
        }

        match self.order.compare(&self.last, &op) {
            Ok(Ordering::Less) => {
                self.last = op;
                Ok(())
            }
            Ok(_) | Err(OrderError::Equal(_)) => Err(out_of_order),
            Err(err) => Err(err.into()),
        }
    }

    /// Whether nothing was tracked yet.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.last.is_zero()
    }

    /// Last accepted op.
    #[must_use]
    pub const fn last(&self) -> OpId {
        self.last
    }

    /// Active ordering policy.
    #[must_use]
    pub const fn order(&self) -> OpOrder {
        self.order
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
