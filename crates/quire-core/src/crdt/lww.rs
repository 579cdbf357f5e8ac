//! Last-Writer-Wins (LWW) register.
//!
//! Holds the value written by the greatest [`OpId`] seen so far. Document
//! title, subtitle, and every block's content snapshot live in one of
//! these.
//!
//! # Merge rule
//!
//! `set(op, value)` applies iff `op` is strictly greater than the stored op
//! under the caller's [`OpOrder`]. An empty register accepts any write.
//! Re-applying the stored op is a no-op, which keeps duplicate delivery
//! harmless.

use crate::model::{OpId, OpOrder, OrderError};

// ---------------------------------------------------------------------------
// Lww
// ---------------------------------------------------------------------------

/// A Last-Writer-Wins register holding a value of type `T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lww<T> {
    current: Option<(OpId, T)>,
}

impl<T> Lww<T> {
    /// Empty register.
    #[must_use]
    pub const fn new() -> Self {
        Self { current: None }
    }

    /// Write `value` stamped with `op` if `op` wins.
    ///
    /// Returns whether the write was applied.
    ///
    /// # Errors
    ///
    /// Propagates comparison failures, e.g. concurrent ops under
    /// [`OpOrder::Strict`].
    pub fn set(&mut self, op: OpId, value: T, order: OpOrder) -> Result<bool, OrderError> {
        let wins = match &self.current {
            None => true,
            Some((cur, _)) if *cur == op => false,
            Some((cur, _)) => order.less(cur, &op)?,
        };

        if wins {
            self.current = Some((op, value));
        }
        Ok(wins)
    }

    /// Current value, if any write happened.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        self.current.as_ref().map(|(_, v)| v)
    }

    /// Op of the current value, or [`OpId::ZERO`] when empty.
    #[must_use]
    pub fn op(&self) -> OpId {
        self.current.as_ref().map_or(OpId::ZERO, |(op, _)| *op)
    }

    /// Whether no write was ever applied.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.current.is_none()
    }
}

impl<T> Default for Lww<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChangeKey, Origin};

    fn op(lamport: u64, change: u64, seq: u32) -> OpId {
        OpId::new(lamport, Origin(change), ChangeKey(change), seq)
    }

    #[test]
    fn empty_register_is_distinguishable() {
        let reg: Lww<String> = Lww::new();
        assert!(reg.is_zero());
        assert_eq!(reg.op(), OpId::ZERO);
        assert_eq!(reg.value(), None);
    }

    #[test]
    fn newer_write_wins() {
        let mut reg = Lww::new();
        assert_eq!(reg.set(op(1, 1, 1), "a", OpOrder::Strict), Ok(true));
        assert_eq!(reg.set(op(2, 2, 1), "b", OpOrder::Strict), Ok(true));
        assert_eq!(reg.value(), Some(&"b"));
        assert_eq!(reg.op(), op(2, 2, 1));
    }

    #[test]
    fn older_write_is_ignored() {
        let mut reg = Lww::new();
        reg.set(op(5, 1, 2), "new", OpOrder::Strict).expect("set");
        assert_eq!(reg.set(op(5, 1, 1), "old", OpOrder::Strict), Ok(false));
        assert_eq!(reg.value(), Some(&"new"));
    }

    #[test]
    fn either_arrival_order_converges() {
        let w1 = (op(1, 1, 1), "first");
        let w2 = (op(3, 2, 1), "second");

        let mut a = Lww::new();
        a.set(w1.0, w1.1, OpOrder::Strict).expect("set");
        a.set(w2.0, w2.1, OpOrder::Strict).expect("set");

        let mut b = Lww::new();
        b.set(w2.0, w2.1, OpOrder::Strict).expect("set");
        b.set(w1.0, w1.1, OpOrder::Strict).expect("set");

        assert_eq!(a, b);
        assert_eq!(a.value(), Some(&"second"));
    }

    #[test]
    fn reapplying_the_stored_op_is_a_noop() {
        let mut reg = Lww::new();
        reg.set(op(1, 1, 1), 10, OpOrder::Strict).expect("set");
        assert_eq!(reg.set(op(1, 1, 1), 10, OpOrder::Strict), Ok(false));
        assert_eq!(reg.value(), Some(&10));
    }

    #[test]
    fn strict_order_surfaces_concurrent_writes() {
        let mut reg = Lww::new();
        reg.set(op(2, 1, 1), "a", OpOrder::Strict).expect("set");
        let err = reg.set(op(2, 2, 1), "b", OpOrder::Strict);
        assert!(matches!(err, Err(OrderError::Concurrent { .. })));
        assert_eq!(reg.value(), Some(&"a"));
    }

    #[test]
    fn tiebreak_order_resolves_concurrent_writes() {
        let mut reg = Lww::new();
        reg.set(op(2, 1, 1), "a", OpOrder::OriginTieBreak).expect("set");
        assert_eq!(reg.set(op(2, 2, 1), "b", OpOrder::OriginTieBreak), Ok(true));
        assert_eq!(reg.value(), Some(&"b"));
    }
}
