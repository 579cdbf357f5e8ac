//! Versions: a set of head changes plus the number of changes they reach.
//!
//! # Token format
//!
//! The empty version is the empty string. Any other version is the
//! multibase base32 (`b` prefix) encoding of
//!
//! ```text
//! varint(total) cid_1 cid_2 ... cid_n
//! ```
//!
//! with heads sorted and deduplicated, so equal versions always produce
//! equal tokens.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::change::base32;
use crate::change::cid::{read_varint, write_varint};
use crate::change::Cid;
use crate::error::{Error, Result};

/// Heads of a change DAG plus the count of changes reachable from them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Version {
    /// Head change ids, sorted and unique.
    pub heads: Vec<Cid>,
    /// Number of changes reachable from the heads.
    pub total: u64,
}

impl Version {
    /// Version over `heads`. Heads are sorted and deduplicated. Without
    /// heads the total is always zero, matching the empty token.
    #[must_use]
    pub fn new(total: u64, mut heads: Vec<Cid>) -> Self {
        if heads.is_empty() {
            return Self::empty();
        }
        heads.sort_unstable();
        heads.dedup();
        Self { heads, total }
    }

    /// The empty version.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            heads: Vec::new(),
            total: 0,
        }
    }

    /// Whether there are no heads.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::with_capacity(2 + self.heads.len() * 36);
        write_varint(&mut buf, self.total);
        for head in &self.heads {
            buf.extend(head.to_bytes());
        }
        write!(f, "b{}", base32::fmt(buf))
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::empty());
        }
        let invalid = |reason: String| Error::InvalidVersion(format!("{s:?}: {reason}"));

        let body = s
            .strip_prefix('b')
            .ok_or_else(|| invalid("unsupported multibase prefix".to_string()))?;
        let bytes = base32::parse(body).map_err(|e| invalid(e.to_string()))?;
        let (total, mut rest) = read_varint(&bytes).map_err(|e| invalid(e.to_string()))?;

        let mut heads = Vec::new();
        while !rest.is_empty() {
            let (cid, tail) = Cid::read_prefix(rest).map_err(|e| invalid(e.to_string()))?;
            heads.push(cid);
            rest = tail;
        }
        if heads.is_empty() {
            return Err(invalid("no heads".to_string()));
        }

        Ok(Self::new(total, heads))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Codec;

    fn cid(s: &str) -> Cid {
        Cid::of(Codec::DagCbor, s.as_bytes())
    }

    #[test]
    fn empty_version_is_empty_string() {
        assert_eq!(Version::empty().to_string(), "");
        assert_eq!("".parse::<Version>().expect("parses"), Version::empty());
        assert!(Version::default().is_empty());
    }

    #[test]
    fn token_parses_back() {
        let v = Version::new(42, vec![cid("c1"), cid("c2")]);
        let s = v.to_string();
        assert!(s.starts_with('b'));
        assert_eq!(s.parse::<Version>().expect("parses"), v);
    }

    #[test]
    fn head_order_does_not_matter() {
        let a = Version::new(3, vec![cid("x"), cid("y"), cid("x")]);
        let b = Version::new(3, vec![cid("y"), cid("x")]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(a.heads.len(), 2);
    }

    #[test]
    fn bad_tokens_are_invalid_version() {
        for bad in ["zabc", "b", "b!!", "baa"] {
            let err = bad.parse::<Version>().expect_err(bad);
            assert!(matches!(err, Error::InvalidVersion(_)), "{bad}: {err:?}");
        }

        let mut truncated = Version::new(1, vec![cid("t")]).to_string();
        truncated.truncate(truncated.len() - 4);
        assert!(truncated.parse::<Version>().is_err());
    }

    #[test]
    fn headless_version_is_empty() {
        let v = Version::new(5, vec![]);
        assert_eq!(v, Version::empty());
        assert_eq!(v.to_string().parse::<Version>().expect("parses"), v);
    }

    #[test]
    fn upper_case_token_is_rejected() {
        let token = Version::new(2, vec![cid("u")]).to_string();
        let upper = format!("b{}", token[1..].to_ascii_uppercase());
        let err = upper.parse::<Version>().expect_err("upper");
        assert!(matches!(err, Error::InvalidVersion(_)));
    }

    #[test]
    fn serde_uses_the_token() {
        let v = Version::new(7, vec![cid("s")]);
        let json = serde_json::to_string(&v).expect("json");
        assert_eq!(json, format!("\"{v}\""));
        assert_eq!(serde_json::from_str::<Version>(&json).expect("back"), v);
    }
}
