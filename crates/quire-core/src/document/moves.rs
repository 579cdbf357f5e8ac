//! Regrouping of move datoms during replay.
//!
//! Every move is written as four datoms sharing one position node:
//!
//! ```text
//! (ROOT, move,            pos)
//! (pos,  position/block,  block)
//! (pos,  position/parent, parent)
//! (pos,  position/left,   left position node, or parent for list start)
//! ```
//!
//! Replay collects them per position node and turns each complete group
//! into a [`MoveOp`] stamped with the op of its `left` datom.

use std::collections::{BTreeMap, HashSet};

use super::attrs;
use crate::error::{Error, Result};
use crate::model::{Datom, NodeId, OpId, OpOrder};

/// One logical move reconstructed from four datoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOp {
    /// Op of the `left` datom.
    pub op: OpId,
    /// Position node id.
    pub pos: NodeId,
    /// Block being moved.
    pub block: NodeId,
    /// New parent.
    pub parent: NodeId,
    /// Left position node, or the parent itself for the list start.
    pub left: NodeId,
    /// Element the new position is inserted after.
    pub reference: OpId,
}

const MARKER: usize = 0;
const BLOCK: usize = 1;
const PARENT: usize = 2;
const LEFT: usize = 3;

fn slot(attribute: &str) -> Option<usize> {
    match attribute {
        attrs::MOVE => Some(MARKER),
        attrs::POS_BLOCK => Some(BLOCK),
        attrs::POS_PARENT => Some(PARENT),
        attrs::POS_LEFT => Some(LEFT),
        _ => None,
    }
}

fn node_value(d: &Datom) -> Result<NodeId> {
    d.value.as_node().ok_or_else(|| {
        Error::malformed(
            "move datom",
            format!("{} on {} must be a ref, got {:?}", d.attribute, d.entity, d.value_type()),
        )
    })
}

/// Accumulates move datoms while the rest of the log is applied.
#[derive(Debug, Default)]
pub struct MoveCollector {
    blocks: HashSet<NodeId>,
    groups: BTreeMap<NodeId, [Option<Datom>; 4]>,
}

impl MoveCollector {
    /// Empty collector knowing only Root and Trash.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: HashSet::from([NodeId::ROOT, NodeId::TRASH]),
            groups: BTreeMap::new(),
        }
    }

    /// Record `d` if it is a move datom.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] if a move marker or block datom does not carry
    /// a ref, or if a position node already has a different datom for the
    /// same attribute.
    pub fn handle(&mut self, d: &Datom) -> Result<()> {
        let Some(slot) = slot(d.attribute.as_str()) else {
            return Ok(());
        };

        let key = if slot == MARKER { node_value(d)? } else { d.entity };
        if slot == BLOCK {
            self.blocks.insert(node_value(d)?);
        }

        let group = self.groups.entry(key).or_default();
        if let Some(prev) = &group[slot] {
            if prev == d {
                return Ok(());
            }
            return Err(Error::malformed(
                "move datom",
                format!("{} sets {} of position {key} again, first set by {}", d.op, d.attribute, prev.op),
            ));
        }
        group[slot] = Some(d.clone());
        Ok(())
    }

    /// Number of position nodes seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether no move datom was seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn complete(&self, pos: NodeId) -> Result<[&Datom; 4]> {
        let incomplete = |found| Error::IncompleteMoveGroup { position: pos, found };
        let group = self.groups.get(&pos).ok_or_else(|| incomplete(0))?;
        let found = group.iter().flatten().count();
        match group {
            [Some(m), Some(b), Some(p), Some(l)] => Ok([m, b, p, l]),
            _ => Err(incomplete(found)),
        }
    }

    /// Resolve every group into a move op, sorted by op under `order`.
    ///
    /// # Errors
    ///
    /// - [`Error::IncompleteMoveGroup`] for a group with fewer than four
    ///   datoms.
    /// - [`Error::Malformed`] for non-ref values.
    /// - [`Error::DanglingLeftReference`] if a left pointer names neither
    ///   a position node nor a known block.
    /// - Order errors from sorting.
    pub fn into_log(self, order: OpOrder) -> Result<Vec<MoveOp>> {
        let mut out = Vec::with_capacity(self.groups.len());

        for &pos in self.groups.keys() {
            let [_, block, parent, left] = self.complete(pos)?;
            let left_node = node_value(left)?;

            let reference = if self.groups.contains_key(&left_node) {
                self.complete(left_node)?[LEFT].op
            } else if self.blocks.contains(&left_node) {
                OpId::ZERO
            } else {
                return Err(Error::DanglingLeftReference {
                    position: pos,
                    left: left_node,
                });
            };

            out.push(MoveOp {
                op: left.op,
                pos,
                block: node_value(block)?,
                parent: node_value(parent)?,
                left: left_node,
                reference,
            });
        }

        order.sort_by_op(&mut out, |m| m.op)?;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attribute, ChangeKey, DatomFactory, Origin};

    fn n(s: &str) -> NodeId {
        NodeId::from_str_id(s).expect("valid id")
    }

    fn group(f: &mut DatomFactory, pos: &str, block: &str, parent: NodeId, left: NodeId) -> Vec<Datom> {
        let pos = n(pos);
        vec![
            f.mint(NodeId::ROOT, Attribute::from_static(attrs::MOVE), pos),
            f.mint(pos, Attribute::from_static(attrs::POS_BLOCK), n(block)),
            f.mint(pos, Attribute::from_static(attrs::POS_PARENT), parent),
            f.mint(pos, Attribute::from_static(attrs::POS_LEFT), left),
        ]
    }

    fn collect(datoms: &[Datom]) -> Result<Vec<MoveOp>> {
        let mut c = MoveCollector::new();
        for d in datoms {
            c.handle(d)?;
        }
        c.into_log(OpOrder::Strict)
    }

    #[test]
    fn groups_resolve_left_references() {
        let mut f = DatomFactory::new(1, Origin(1), ChangeKey(1), 0);
        let mut log = group(&mut f, "p1", "b1", NodeId::ROOT, NodeId::ROOT);
        log.extend(group(&mut f, "p2", "b2", NodeId::ROOT, n("p1")));

        let ops = collect(&log).expect("log");
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].block, n("b1"));
        assert_eq!(ops[0].reference, OpId::ZERO);
        assert_eq!(ops[0].op, log[3].op);
        assert_eq!(ops[1].reference, log[3].op);
    }

    #[test]
    fn missing_datom_is_incomplete_group() {
        let mut f = DatomFactory::new(1, Origin(1), ChangeKey(1), 0);
        let mut log = group(&mut f, "p1", "b1", NodeId::ROOT, NodeId::ROOT);
        log.remove(2);
        let err = collect(&log).expect_err("incomplete");
        assert!(matches!(err, Error::IncompleteMoveGroup { found: 3, .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn repeated_attribute_in_group_is_malformed() {
        let mut f = DatomFactory::new(1, Origin(1), ChangeKey(1), 0);
        let mut log = group(&mut f, "p1", "b1", NodeId::ROOT, NodeId::ROOT);
        let pos = n("p1");
        log.push(f.mint(pos, Attribute::from_static(attrs::POS_PARENT), n("b9")));
        let err = collect(&log).expect_err("repeated parent");
        assert!(matches!(err, Error::Malformed { what: "move datom", .. }));
    }

    #[test]
    fn second_marker_for_same_position_is_malformed() {
        let mut f = DatomFactory::new(1, Origin(1), ChangeKey(1), 0);
        let mut log = group(&mut f, "p1", "b1", NodeId::ROOT, NodeId::ROOT);
        log.push(f.mint(NodeId::ROOT, Attribute::from_static(attrs::MOVE), n("p1")));
        assert!(collect(&log).is_err());
    }

    #[test]
    fn same_datom_twice_is_idempotent() {
        let mut f = DatomFactory::new(1, Origin(1), ChangeKey(1), 0);
        let mut log = group(&mut f, "p1", "b1", NodeId::ROOT, NodeId::ROOT);
        log.push(log[2].clone());
        assert_eq!(collect(&log).expect("log").len(), 1);
    }

    #[test]
    fn unknown_left_is_dangling() {
        let mut f = DatomFactory::new(1, Origin(1), ChangeKey(1), 0);
        let log = group(&mut f, "p1", "b1", NodeId::ROOT, n("ghost"));
        let err = collect(&log).expect_err("dangling");
        assert!(matches!(err, Error::DanglingLeftReference { .. }));
    }

    #[test]
    fn non_ref_values_are_malformed() {
        let mut f = DatomFactory::new(1, Origin(1), ChangeKey(1), 0);
        let bad = f.mint(NodeId::ROOT, Attribute::from_static(attrs::MOVE), "not a ref");
        let mut c = MoveCollector::new();
        assert!(matches!(c.handle(&bad), Err(Error::Malformed { .. })));
    }

    #[test]
    fn other_attributes_are_ignored() {
        let mut f = DatomFactory::new(1, Origin(1), ChangeKey(1), 0);
        let title = f.mint(NodeId::ROOT, Attribute::from_static(attrs::TITLE), "t");
        let mut c = MoveCollector::new();
        c.handle(&title).expect("ignored");
        assert!(c.is_empty());
    }

    #[test]
    fn left_pointing_to_parent_block_starts_the_list() {
        let mut f = DatomFactory::new(1, Origin(1), ChangeKey(1), 0);
        let mut log = group(&mut f, "p1", "b1", NodeId::ROOT, NodeId::ROOT);
        log.extend(group(&mut f, "p2", "b2", n("b1"), n("b1")));
        let ops = collect(&log).expect("log");
        assert_eq!(ops[1].parent, n("b1"));
        assert_eq!(ops[1].reference, OpId::ZERO);
    }
}
