//! In-memory DAG of one object's changes.
//!
//! The [`ChangeDag`] indexes signed changes by content id. Changes may be
//! inserted in any order; parent/child links resolve lazily as changes
//! arrive. Duplicates (same id) are skipped.
//!
//! # Causal order
//!
//! [`ChangeDag::causal_order`] collects everything reachable from a set of
//! heads with a DFS over parents and sorts it by `(lamport, id)`. Because a
//! change's lamport time always exceeds its parents', that order is a valid
//! topological order.

use std::collections::{HashMap, HashSet, VecDeque};

use super::cid::Cid;
use super::record::SignedChange;
use crate::error::{Error, ObjectKind, Result};
use crate::version::Version;

// ---------------------------------------------------------------------------
// DagNode
// ---------------------------------------------------------------------------

/// A change and its links.
#[derive(Debug, Clone)]
pub struct DagNode {
    /// The change stored at this node.
    pub change: SignedChange,
    /// Ids of parent changes.
    pub parents: Vec<Cid>,
    /// Ids of known child changes.
    pub children: Vec<Cid>,
}

impl DagNode {
    /// Lamport time of the change.
    #[must_use]
    pub const fn lamport(&self) -> u64 {
        self.change.change().lamport_time
    }
}

// ---------------------------------------------------------------------------
// ChangeDag
// ---------------------------------------------------------------------------

/// Changes of one object, keyed by content id.
#[derive(Debug, Clone)]
pub struct ChangeDag {
    object: Cid,
    nodes: HashMap<Cid, DagNode>,
}

impl ChangeDag {
    /// Empty DAG for `object`.
    #[must_use]
    pub fn new(object: Cid) -> Self {
        Self {
            object,
            nodes: HashMap::new(),
        }
    }

    /// Object this DAG belongs to.
    #[must_use]
    pub const fn object(&self) -> Cid {
        self.object
    }

    /// Insert a change. Returns `false` for duplicates.
    ///
    /// # Errors
    ///
    /// - [`Error::ObjectMismatch`] if the change belongs to another object.
    /// - [`Error::LamportViolation`] if a known parent's lamport time is not
    ///   below the change's, or a known child's is not above it. The check
    ///   holds whatever order changes are inserted in.
    pub fn insert(&mut self, change: SignedChange) -> Result<bool> {
        let id = change.id();
        if self.nodes.contains_key(&id) {
            return Ok(false);
        }

        let record = change.change();
        if record.object != self.object {
            return Err(Error::ObjectMismatch {
                change: id,
                expected: self.object,
                found: record.object,
            });
        }
        for parent in &record.parents {
            if let Some(p) = self.nodes.get(parent)
                && p.lamport() >= record.lamport_time
            {
                return Err(Error::LamportViolation {
                    change: id,
                    lamport: record.lamport_time,
                    parent: *parent,
                    parent_lamport: p.lamport(),
                });
            }
        }

        // Children that arrived before this change.
        let children: Vec<Cid> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.parents.contains(&id))
            .map(|(k, _)| *k)
            .collect();
        for child in &children {
            let child_lamport = self.nodes[child].lamport();
            if child_lamport <= record.lamport_time {
                return Err(Error::LamportViolation {
                    change: *child,
                    lamport: child_lamport,
                    parent: id,
                    parent_lamport: record.lamport_time,
                });
            }
        }

        let parents = record.parents.clone();
        for parent in &parents {
            if let Some(p) = self.nodes.get_mut(parent) {
                p.children.push(id);
            }
        }

        self.nodes.insert(
            id,
            DagNode {
                change,
                parents,
                children,
            },
        );
        Ok(true)
    }

    /// Number of changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the DAG holds no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether a change is present.
    #[must_use]
    pub fn contains(&self, id: &Cid) -> bool {
        self.nodes.contains_key(id)
    }

    /// Look up a node.
    #[must_use]
    pub fn get(&self, id: &Cid) -> Option<&DagNode> {
        self.nodes.get(id)
    }

    /// Parents of `change` that are not in the DAG yet.
    #[must_use]
    pub fn missing_parents(&self, change: &SignedChange) -> Vec<Cid> {
        change
            .change()
            .parents
            .iter()
            .filter(|p| !self.nodes.contains_key(p))
            .copied()
            .collect()
    }

    /// Changes no other change names as parent, sorted.
    #[must_use]
    pub fn heads(&self) -> Vec<Cid> {
        let mut heads: Vec<Cid> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.children.is_empty())
            .map(|(id, _)| *id)
            .collect();
        heads.sort_unstable();
        heads
    }

    /// All transitive parents of `id`, excluding `id` itself.
    #[must_use]
    pub fn ancestors(&self, id: &Cid) -> HashSet<Cid> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([*id]);

        while let Some(current) = queue.pop_front() {
            if let Some(node) = self.nodes.get(&current) {
                for parent in &node.parents {
                    if visited.insert(*parent) {
                        queue.push_back(*parent);
                    }
                }
            }
        }

        visited
    }

    /// Whether `a` happened before `b`.
    #[must_use]
    pub fn is_ancestor(&self, a: &Cid, b: &Cid) -> bool {
        a != b && self.ancestors(b).contains(a)
    }

    /// Whether neither change is an ancestor of the other.
    #[must_use]
    pub fn are_concurrent(&self, a: &Cid, b: &Cid) -> bool {
        a != b && !self.is_ancestor(a, b) && !self.is_ancestor(b, a)
    }

    /// Every change reachable from `heads`, sorted by `(lamport, id)`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if a head or any reachable parent is missing.
    pub fn causal_order(&self, heads: &[Cid]) -> Result<Vec<&SignedChange>> {
        let mut visited = HashSet::new();
        let mut stack: Vec<Cid> = heads.to_vec();
        let mut out = Vec::new();

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let node = self
                .nodes
                .get(&id)
                .ok_or_else(|| Error::not_found(ObjectKind::Change, id))?;
            out.push(node);
            stack.extend(node.parents.iter().copied());
        }

        out.sort_by_key(|n| (n.lamport(), n.change.id()));
        Ok(out.into_iter().map(|n| &n.change).collect())
    }

    /// Current heads plus the number of changes.
    #[must_use]
    pub fn version(&self) -> Version {
        Version::new(self.nodes.len() as u64, self.heads())
    }

    /// Lamport time for a change on top of `heads`: the largest head lamport
    /// plus one, or 1 for no heads.
    #[must_use]
    pub fn next_lamport(&self, heads: &[Cid]) -> u64 {
        heads
            .iter()
            .filter_map(|h| self.nodes.get(h))
            .map(DagNode::lamport)
            .max()
            .unwrap_or(0)
            + 1
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::change::{AccountKey, Change, Codec, DeviceKey};

    struct Fixture {
        object: Cid,
        key: DeviceKey,
        account: AccountKey,
        time: i64,
    }

    impl Fixture {
        fn new() -> Self {
            let mut rng = StdRng::seed_from_u64(17);
            Self {
                object: Cid::of(Codec::DagCbor, b"doc"),
                key: DeviceKey::new(&mut rng),
                account: AccountKey::new(&mut rng),
                time: 0,
            }
        }

        fn change(&mut self, parents: &[Cid], lamport: u64) -> SignedChange {
            self.time += 1;
            Change::new(
                self.object,
                self.account.public(),
                parents.to_vec(),
                lamport,
                Vec::new(),
                self.time,
                self.key.public(),
            )
            .sign(&self.key)
            .expect("sign")
        }
    }

    #[test]
    fn linear_chain_has_one_head() {
        let mut f = Fixture::new();
        let a = f.change(&[], 1);
        let b = f.change(&[a.id()], 2);
        let c = f.change(&[b.id()], 3);

        let mut dag = ChangeDag::new(f.object);
        for ch in [&a, &b, &c] {
            assert!(dag.insert(ch.clone()).expect("insert"));
        }
        assert_eq!(dag.heads(), vec![c.id()]);
        assert!(dag.is_ancestor(&a.id(), &c.id()));
        assert!(!dag.is_ancestor(&c.id(), &a.id()));
        assert_eq!(dag.next_lamport(&dag.heads()), 4);
        assert_eq!(dag.version().total, 3);
    }

    #[test]
    fn out_of_order_insert_links_children() {
        let mut f = Fixture::new();
        let a = f.change(&[], 1);
        let b = f.change(&[a.id()], 2);

        let mut dag = ChangeDag::new(f.object);
        dag.insert(b.clone()).expect("child first");
        assert_eq!(dag.missing_parents(&b), vec![a.id()]);
        dag.insert(a.clone()).expect("parent");
        assert_eq!(dag.heads(), vec![b.id()]);
        assert_eq!(dag.get(&a.id()).expect("a").children, vec![b.id()]);
    }

    #[test]
    fn duplicates_are_skipped() {
        let mut f = Fixture::new();
        let a = f.change(&[], 1);
        let mut dag = ChangeDag::new(f.object);
        assert!(dag.insert(a.clone()).expect("first"));
        assert!(!dag.insert(a).expect("second"));
        assert_eq!(dag.len(), 1);
    }

    #[test]
    fn concurrent_branches_are_detected_and_ordered() {
        let mut f = Fixture::new();
        let root = f.change(&[], 1);
        let left = f.change(&[root.id()], 2);
        let right = f.change(&[root.id()], 2);
        let merge = f.change(&[left.id(), right.id()], 3);

        let mut dag = ChangeDag::new(f.object);
        for ch in [&merge, &right, &left, &root] {
            dag.insert(ch.clone()).expect("insert");
        }

        assert!(dag.are_concurrent(&left.id(), &right.id()));
        let order: Vec<Cid> = dag
            .causal_order(&[merge.id()])
            .expect("order")
            .iter()
            .map(|c| c.id())
            .collect();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], root.id());
        assert_eq!(order[3], merge.id());
        let (lo, hi) = if left.id() < right.id() { (left.id(), right.id()) } else { (right.id(), left.id()) };
        assert_eq!(&order[1..3], &[lo, hi]);
    }

    #[test]
    fn missing_parent_is_not_found() {
        let mut f = Fixture::new();
        let a = f.change(&[], 1);
        let b = f.change(&[a.id()], 2);
        let mut dag = ChangeDag::new(f.object);
        dag.insert(b.clone()).expect("insert");

        let err = dag.causal_order(&[b.id()]).expect_err("gap");
        assert!(matches!(err, Error::NotFound { kind: ObjectKind::Change, .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn lamport_must_exceed_parents() {
        let mut f = Fixture::new();
        let a = f.change(&[], 5);
        let b = f.change(&[a.id()], 5);
        let mut dag = ChangeDag::new(f.object);
        dag.insert(a).expect("insert");
        let err = dag.insert(b).expect_err("violation");
        assert!(matches!(err, Error::LamportViolation { .. }));
    }

    #[test]
    fn lamport_is_checked_when_child_arrives_first() {
        let mut f = Fixture::new();
        let a = f.change(&[], 5);
        let b = f.change(&[a.id()], 3);
        let mut dag = ChangeDag::new(f.object);
        dag.insert(b.clone()).expect("child first");
        let err = dag.insert(a.clone()).expect_err("violation");
        match err {
            Error::LamportViolation {
                change,
                lamport,
                parent,
                parent_lamport,
            } => {
                assert_eq!(change, b.id());
                assert_eq!(lamport, 3);
                assert_eq!(parent, a.id());
                assert_eq!(parent_lamport, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dag.contains(&a.id()));
    }

    #[test]
    fn foreign_object_is_rejected() {
        let mut f = Fixture::new();
        let a = f.change(&[], 1);
        let mut dag = ChangeDag::new(Cid::of(Codec::DagCbor, b"other"));
        let err = dag.insert(a).expect_err("mismatch");
        assert!(matches!(err, Error::ObjectMismatch { .. }));
    }
}
