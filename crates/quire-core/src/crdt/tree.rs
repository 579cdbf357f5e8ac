//! Ordered block tree with moves.
//!
//! Every parent owns an [`Rga`] of [`BlockPosition`]s. A block's current
//! location is a [`Position`] handle into whichever list holds its live
//! element. Moving a block inserts a fresh element under the new parent and
//! tombstones the old one, so at any time each block has at most one live
//! element across all lists.
//!
//! Deleting is a move under [`NodeId::TRASH`]. Children of a trashed block
//! keep pointing at it: they drop out of the walk from Root but remain
//! reachable through [`BlockTree::iter_from`] on the trash.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::rga::{ElemIdx, Rga};
use crate::error::{Error, Result};
use crate::model::{NodeId, OpId, OpOrder};

/// Element stored in a parent's child list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPosition {
    /// Position node id, minted per move.
    pub id: NodeId,
    /// Parent that owns the list.
    pub parent: NodeId,
    /// Block placed by this element.
    pub block: NodeId,
}

/// Where a block currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Parent whose list holds the element.
    pub parent: NodeId,
    /// Element inside that list.
    pub elem: ElemIdx,
}

/// One step of a depth-first walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeItem {
    /// Parent of the block.
    pub parent: NodeId,
    /// The block.
    pub block: NodeId,
}

/// Ordered tree of blocks.
#[derive(Debug, Clone)]
pub struct BlockTree {
    children: HashMap<NodeId, Rga<BlockPosition>>,
    block_pos: HashMap<NodeId, Position>,
}

impl BlockTree {
    /// Tree with empty Root and Trash lists.
    #[must_use]
    pub fn new() -> Self {
        let mut children = HashMap::new();
        children.insert(NodeId::ROOT, Rga::new());
        children.insert(NodeId::TRASH, Rga::new());
        Self {
            children,
            block_pos: HashMap::new(),
        }
    }

    /// Whether no block was ever placed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.block_pos.is_empty()
    }

    /// Current position of a block.
    #[must_use]
    pub fn position_of(&self, block: NodeId) -> Option<Position> {
        self.block_pos.get(&block).copied()
    }

    /// Current parent of a block.
    #[must_use]
    pub fn parent_of(&self, block: NodeId) -> Option<NodeId> {
        self.block_pos.get(&block).map(|p| p.parent)
    }

    /// Child list of `parent`, if it ever had children.
    #[must_use]
    pub fn children(&self, parent: NodeId) -> Option<&Rga<BlockPosition>> {
        self.children.get(&parent)
    }

    /// Whether `ancestor` lies on the parent chain of `node`.
    ///
    /// A node is not its own ancestor.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cur = self.parent_of(node);
        // The chain can't be longer than the number of placed blocks.
        for _ in 0..=self.block_pos.len() {
            match cur {
                Some(p) if p == ancestor => return true,
                Some(p) => cur = self.parent_of(p),
                None => return false,
            }
        }
        false
    }

    /// Whether `block` already sits under `parent` right after the element
    /// `reference` (ignoring tombstones in between).
    ///
    /// # Errors
    ///
    /// [`Error::UnknownReference`] if `reference` is not in the list.
    pub fn is_in_place(&self, block: NodeId, parent: NodeId, reference: OpId) -> Result<bool> {
        let Some(pos) = self.position_of(block) else {
            return Ok(false);
        };
        if pos.parent != parent {
            return Ok(false);
        }
        let Some(list) = self.children.get(&parent) else {
            return Ok(false);
        };
        let target = list.element(reference)?;

        let mut cur = pos.elem;
        loop {
            let Some(prev) = list.prev_of(cur) else {
                return Ok(false);
            };
            if prev == target {
                return Ok(true);
            }
            if prev == ElemIdx::START || !list.is_deleted(prev) {
                return Ok(false);
            }
            cur = prev;
        }
    }

    /// Reference op and left position node for placing a block under
    /// `parent` right after the block `left`, or at the start when `left`
    /// is `None`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidMove`] if `left` does not currently live under
    /// `parent`.
    pub fn anchor(&self, block: NodeId, parent: NodeId, left: Option<NodeId>) -> Result<(OpId, NodeId)> {
        let Some(left) = left else {
            return Ok((OpId::ZERO, parent));
        };

        let invalid = |reason: &str| Error::InvalidMove {
            block,
            parent,
            reason: reason.to_string(),
        };

        let pos = self
            .position_of(left)
            .ok_or_else(|| invalid("left sibling is not in the tree"))?;
        if pos.parent != parent {
            return Err(invalid("left sibling lives under another parent"));
        }
        let list = self
            .children
            .get(&parent)
            .ok_or_else(|| invalid("parent has no children"))?;
        let elem = list
            .value(pos.elem)
            .ok_or_else(|| invalid("left sibling has no position"))?;

        Ok((list.id(pos.elem), elem.id))
    }

    /// Integrate one move operation.
    ///
    /// Returns whether the block changed place. Rejected cycles and
    /// in-place moves still leave a tombstoned element behind so later
    /// moves can reference this position node.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidMove`] for reserved blocks or self-parenting.
    /// - [`Error::UnknownReference`] if `reference` is not in the list.
    /// - [`Error::DuplicateElement`] if `op` was already integrated.
    /// - Order errors from the comparison policy.
    pub fn integrate_move(
        &mut self,
        op: OpId,
        block: NodeId,
        parent: NodeId,
        pos_id: NodeId,
        reference: OpId,
        order: OpOrder,
    ) -> Result<bool> {
        if block.is_reserved() || block.is_zero() {
            return Err(Error::InvalidMove {
                block,
                parent,
                reason: "reserved block can't be moved".to_string(),
            });
        }
        if block == parent {
            return Err(Error::InvalidMove {
                block,
                parent,
                reason: "block can't be its own parent".to_string(),
            });
        }

        let in_place = self.is_in_place(block, parent, reference)?;
        let cycle = !in_place && self.is_ancestor(block, parent);

        let list = self.children.entry(parent).or_default();
        let after = list.element(reference)?;
        let value = BlockPosition {
            id: pos_id,
            parent,
            block,
        };
        let elem = list.insert_after(op, after, value, order)?;

        if in_place || cycle {
            list.mark_deleted(elem);
            if cycle {
                debug!(%block, %parent, %op, "move rejected: would create a cycle");
            }
            return Ok(false);
        }

        if let Some(old) = self.block_pos.insert(block, Position { parent, elem })
            && let Some(old_list) = self.children.get_mut(&old.parent)
        {
            old_list.mark_deleted(old.elem);
        }

        Ok(true)
    }

    /// Depth-first pre-order walk over live blocks, starting at Root.
    #[must_use]
    pub fn iter(&self) -> TreeIter<'_> {
        self.iter_from(NodeId::ROOT)
    }

    /// Depth-first pre-order walk over the subtree under `parent`.
    #[must_use]
    pub fn iter_from(&self, parent: NodeId) -> TreeIter<'_> {
        TreeIter {
            tree: self,
            stack: vec![(parent, ElemIdx::START)],
        }
    }
}

impl Default for BlockTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator returned by [`BlockTree::iter`].
#[derive(Debug)]
pub struct TreeIter<'a> {
    tree: &'a BlockTree,
    stack: Vec<(NodeId, ElemIdx)>,
}

impl Iterator for TreeIter<'_> {
    type Item = TreeItem;

    fn next(&mut self) -> Option<TreeItem> {
        loop {
            let &(parent, cursor) = self.stack.last()?;
            let Some(list) = self.tree.children.get(&parent) else {
                self.stack.pop();
                continue;
            };
            let Some(idx) = list.next_alive(cursor) else {
                self.stack.pop();
                continue;
            };
            if let Some(top) = self.stack.last_mut() {
                top.1 = idx;
            }
            let Some(pos) = list.value(idx) else {
                continue;
            };
            if self.tree.children.contains_key(&pos.block) {
                self.stack.push((pos.block, ElemIdx::START));
            }
            return Some(TreeItem {
                parent,
                block: pos.block,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChangeKey, Origin};

    fn op(lamport: u64, seq: u32) -> OpId {
        OpId::new(lamport, Origin(1), ChangeKey(1), seq)
    }

    fn n(s: &str) -> NodeId {
        NodeId::from_str_id(s).expect("valid id")
    }

    /// Minimal local driver: computes the anchor and mints a position id.
    struct Driver {
        tree: BlockTree,
        seq: u32,
    }

    impl Driver {
        fn new() -> Self {
            Self {
                tree: BlockTree::new(),
                seq: 0,
            }
        }

        fn mv(&mut self, block: &str, parent: &str, left: &str) -> Result<bool> {
            let block = n(block);
            let parent = if parent.is_empty() { NodeId::ROOT } else { n(parent) };
            let left = (!left.is_empty()).then(|| n(left));
            let (reference, _) = self.tree.anchor(block, parent, left)?;
            self.seq += 1;
            let pos = n(&format!("p{}", self.seq));
            self.tree
                .integrate_move(op(1, self.seq), block, parent, pos, reference, OpOrder::Strict)
        }

        fn walk(&self) -> Vec<(String, String)> {
            self.tree
                .iter()
                .map(|i| (i.parent.to_string(), i.block.to_string()))
                .collect()
        }
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(p, b)| ((*p).to_string(), (*b).to_string()))
            .collect()
    }

    #[test]
    fn builds_nested_tree_in_dfs_order() {
        let mut d = Driver::new();
        assert!(d.mv("b1", "", "").expect("move"));
        assert!(d.mv("b2", "", "b1").expect("move"));
        assert!(d.mv("b3", "b1", "").expect("move"));
        assert!(d.mv("b4", "b3", "").expect("move"));

        assert_eq!(
            d.walk(),
            pairs(&[("$ROOT", "b1"), ("b1", "b3"), ("b3", "b4"), ("$ROOT", "b2")])
        );
    }

    #[test]
    fn moving_into_place_twice_is_noop() {
        let mut d = Driver::new();
        assert!(d.mv("b1", "", "").expect("move"));
        assert!(!d.mv("b1", "", "").expect("move"));
        assert_eq!(d.walk(), pairs(&[("$ROOT", "b1")]));
    }

    #[test]
    fn in_place_ignores_tombstones_between() {
        let mut d = Driver::new();
        d.mv("b1", "", "").expect("move");
        d.mv("b2", "", "b1").expect("move");
        d.mv("b3", "", "b2").expect("move");
        // Moving b2 away leaves a tombstone between b1 and b3.
        d.mv("b2", "b1", "").expect("move");
        assert!(!d.mv("b3", "", "b1").expect("move"));
        assert_eq!(
            d.walk(),
            pairs(&[("$ROOT", "b1"), ("b1", "b2"), ("$ROOT", "b3")])
        );
    }

    #[test]
    fn cycles_are_rejected_by_integration() {
        let mut d = Driver::new();
        d.mv("a", "", "").expect("move");
        d.mv("b", "", "a").expect("move");
        d.mv("b", "a", "").expect("move");
        let before = d.walk();

        // Integrating a move of `a` under its own child keeps the tree.
        assert!(!d.mv("a", "b", "").expect("integrates"));
        assert_eq!(d.walk(), before);
        assert!(d.tree.is_ancestor(n("a"), n("b")));
        assert!(!d.tree.is_ancestor(n("b"), n("a")));
    }

    #[test]
    fn self_parent_and_reserved_blocks_are_invalid() {
        let mut d = Driver::new();
        let err = d.mv("a", "a", "").expect_err("self parent");
        assert!(matches!(err, Error::InvalidMove { .. }));
        assert!(err.is_recoverable());

        let err = d
            .tree
            .integrate_move(op(9, 1), NodeId::ROOT, NodeId::TRASH, n("p"), OpId::ZERO, OpOrder::Strict)
            .expect_err("reserved");
        assert!(matches!(err, Error::InvalidMove { .. }));
    }

    #[test]
    fn foreign_left_sibling_is_invalid() {
        let mut d = Driver::new();
        d.mv("a", "", "").expect("move");
        d.mv("b", "a", "").expect("move");
        let err = d.mv("c", "", "b").expect_err("b is not under root");
        assert!(matches!(err, Error::InvalidMove { .. }));
        let err = d.mv("c", "", "zz").expect_err("zz not in tree");
        assert!(matches!(err, Error::InvalidMove { .. }));
    }

    #[test]
    fn deleted_subtree_stays_reachable_from_trash() {
        let mut d = Driver::new();
        d.mv("b1", "", "").expect("move");
        d.mv("b2", "", "b1").expect("move");
        d.mv("b4", "b2", "").expect("move");

        assert!(d.mv("b2", "$TRASH", "").expect("delete"));
        assert_eq!(d.walk(), pairs(&[("$ROOT", "b1")]));

        let trash: Vec<_> = d
            .tree
            .iter_from(NodeId::TRASH)
            .map(|i| i.block.to_string())
            .collect();
        assert_eq!(trash, vec!["b2", "b4"]);
        assert_eq!(d.tree.parent_of(n("b4")), Some(n("b2")));
    }

    #[test]
    fn blocks_can_come_back_from_trash() {
        let mut d = Driver::new();
        d.mv("b1", "", "").expect("move");
        d.mv("b1", "$TRASH", "").expect("delete");
        assert!(d.walk().is_empty());
        assert!(d.mv("b1", "", "").expect("restore"));
        assert_eq!(d.walk(), pairs(&[("$ROOT", "b1")]));
    }

    #[test]
    fn replay_order_of_sorted_moves_is_deterministic() {
        // Two moves of the same block; the later op wins regardless of the
        // fact that both were minted against the same starting state.
        let mut tree = BlockTree::new();
        let s = OpOrder::Strict;
        tree.integrate_move(op(1, 1), n("a"), NodeId::ROOT, n("p1"), OpId::ZERO, s)
            .expect("a");
        tree.integrate_move(op(1, 2), n("b"), NodeId::ROOT, n("p2"), op(1, 1), s)
            .expect("b");
        tree.integrate_move(op(2, 1), n("b"), n("a"), n("p3"), OpId::ZERO, s)
            .expect("b under a");
        tree.integrate_move(op(3, 1), n("b"), NodeId::ROOT, n("p4"), OpId::ZERO, s)
            .expect("b back to root start");

        let walk: Vec<_> = tree.iter().map(|i| i.block.to_string()).collect();
        assert_eq!(walk, vec!["b", "a"]);
        assert!(tree.is_in_place(n("b"), NodeId::ROOT, OpId::ZERO).expect("ref"));
    }

    #[test]
    fn unknown_reference_is_an_error() {
        let mut tree = BlockTree::new();
        let err = tree
            .integrate_move(op(2, 1), n("a"), NodeId::ROOT, n("p"), op(1, 7), OpOrder::Strict)
            .expect_err("unknown ref");
        assert!(matches!(err, Error::UnknownReference(_)));
        assert!(tree.is_empty());
    }
}
