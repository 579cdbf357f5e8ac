//! Replicated Growable Array (RGA).
//!
//! A list CRDT where every element is inserted *after* a reference element
//! and carries a unique [`OpId`]. Concurrent inserts at the same reference
//! are ordered by the skip rule: starting at the reference, walk right over
//! neighbours whose id is greater than the incoming id, and insert before
//! the first neighbour that is not. Because ids grow with causality this
//! yields the same order no matter in which order inserts arrive.
//!
//! Elements live in an arena and are addressed by [`ElemIdx`]. Deleting an
//! element only tombstones it, so references to it stay resolvable forever.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::{OpId, OpOrder};

/// Handle of an element inside one [`Rga`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElemIdx(usize);

impl ElemIdx {
    /// The start sentinel of every list.
    pub const START: Self = Self(0);
}

#[derive(Debug, Clone)]
struct Element<T> {
    id: OpId,
    value: Option<T>,
    deleted: bool,
    prev: Option<ElemIdx>,
    next: Option<ElemIdx>,
}

/// Arena-backed RGA list.
#[derive(Debug, Clone)]
pub struct Rga<T> {
    elems: Vec<Element<T>>,
    index: HashMap<OpId, ElemIdx>,
}

impl<T> Rga<T> {
    /// List holding only the start sentinel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            elems: vec![Element {
                id: OpId::ZERO,
                value: None,
                deleted: false,
                prev: None,
                next: None,
            }],
            index: HashMap::new(),
        }
    }

    /// Resolve an element id. The zero id resolves to [`ElemIdx::START`].
    ///
    /// # Errors
    ///
    /// [`Error::UnknownReference`] if no element has this id.
    pub fn element(&self, id: OpId) -> Result<ElemIdx> {
        if id.is_zero() {
            return Ok(ElemIdx::START);
        }
        self.index
            .get(&id)
            .copied()
            .ok_or(Error::UnknownReference(id))
    }

    /// Insert `value` with `id` after the element `after`, applying the
    /// skip rule.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateElement`] if `id` is zero or already present,
    /// [`Error::UnknownElementHandle`] if `after` came from another list,
    /// and comparison errors from `order`.
    pub fn insert_after(&mut self, id: OpId, after: ElemIdx, value: T, order: OpOrder) -> Result<ElemIdx> {
        if id.is_zero() || self.index.contains_key(&id) {
            return Err(Error::DuplicateElement(id));
        }
        if after.0 >= self.elems.len() {
            return Err(Error::UnknownElementHandle {
                index: after.0,
                len: self.elems.len(),
            });
        }

        let mut left = after;
        while let Some(next) = self.elems[left.0].next {
            let next_id = self.elems[next.0].id;
            if order.compare(&next_id, &id)? == Ordering::Greater {
                tracing::trace!(%next_id, incoming = %id, "rga skip");
                left = next;
            } else {
                break;
            }
        }

        let idx = ElemIdx(self.elems.len());
        let right = self.elems[left.0].next;
        self.elems.push(Element {
            id,
            value: Some(value),
            deleted: false,
            prev: Some(left),
            next: right,
        });
        self.elems[left.0].next = Some(idx);
        if let Some(r) = right {
            self.elems[r.0].prev = Some(idx);
        }
        self.index.insert(id, idx);

        Ok(idx)
    }

    /// Tombstone an element. The start sentinel can't be deleted.
    pub fn mark_deleted(&mut self, idx: ElemIdx) {
        if idx == ElemIdx::START {
            return;
        }
        if let Some(el) = self.elems.get_mut(idx.0) {
            el.deleted = true;
        }
    }

    /// Whether the element is tombstoned.
    #[must_use]
    pub fn is_deleted(&self, idx: ElemIdx) -> bool {
        self.elems.get(idx.0).is_none_or(|el| el.deleted)
    }

    /// Id of an element ([`OpId::ZERO`] for the sentinel).
    #[must_use]
    pub fn id(&self, idx: ElemIdx) -> OpId {
        self.elems.get(idx.0).map_or(OpId::ZERO, |el| el.id)
    }

    /// Value of an element, `None` for the sentinel.
    #[must_use]
    pub fn value(&self, idx: ElemIdx) -> Option<&T> {
        self.elems.get(idx.0).and_then(|el| el.value.as_ref())
    }

    /// Immediate left neighbour, tombstones included. `None` for the
    /// sentinel.
    #[must_use]
    pub fn prev_of(&self, idx: ElemIdx) -> Option<ElemIdx> {
        self.elems.get(idx.0).and_then(|el| el.prev)
    }

    /// Nearest live element to the left, or `None` if only the sentinel
    /// (or tombstones) precede `idx`.
    #[must_use]
    pub fn prev_alive(&self, idx: ElemIdx) -> Option<ElemIdx> {
        let mut cur = self.elems.get(idx.0)?.prev;
        while let Some(p) = cur {
            if p == ElemIdx::START {
                return None;
            }
            if !self.elems[p.0].deleted {
                return Some(p);
            }
            cur = self.elems[p.0].prev;
        }
        None
    }

    /// Nearest live element to the right.
    #[must_use]
    pub fn next_alive(&self, idx: ElemIdx) -> Option<ElemIdx> {
        let mut cur = self.elems.get(idx.0)?.next;
        while let Some(n) = cur {
            if !self.elems[n.0].deleted {
                return Some(n);
            }
            cur = self.elems[n.0].next;
        }
        None
    }

    /// Live elements in list order.
    pub fn iter(&self) -> impl Iterator<Item = (ElemIdx, &T)> + '_ {
        std::iter::successors(self.next_alive(ElemIdx::START), |idx| self.next_alive(*idx))
            .filter_map(|idx| self.value(idx).map(|v| (idx, v)))
    }

    /// Ids of all elements, tombstones included, in list order.
    #[must_use]
    pub fn ids(&self) -> Vec<OpId> {
        std::iter::successors(self.elems[0].next, |idx| self.elems[idx.0].next)
            .map(|idx| self.elems[idx.0].id)
            .collect()
    }

    /// Number of live elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether the list has no elements at all, tombstones included.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elems.len() == 1
    }
}

impl<T> Default for Rga<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
