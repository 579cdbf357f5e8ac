//! Working copy of a document: datoms not yet signed into a change.

use std::collections::HashSet;

use crate::change::{Cid, PublicKey};
use crate::model::{Attribute, ChangeKey, Datom, DatomFactory, NodeId, NodeIdGenerator, OpId, Value};
use crate::version::Version;

/// Unpublished datoms of one (object, device) pair.
///
/// Datoms get a random draft [`ChangeKey`]. Amending a value written
/// earlier in the same draft marks the older datom as deleted so it never
/// reaches the published body.
#[derive(Debug, Clone)]
pub struct Draft {
    object: Cid,
    parents: Vec<Cid>,
    factory: DatomFactory,
    ids: NodeIdGenerator,
    dirty: Vec<Datom>,
    deleted: HashSet<OpId>,
}

impl Draft {
    /// Draft on top of `base`. `lamport` is the time the published change
    /// will carry, i.e. the DAG's next lamport for those heads.
    #[must_use]
    pub fn new(object: Cid, base: &Version, lamport: u64, device: PublicKey, mut ids: NodeIdGenerator) -> Self {
        let change = ids.mint_change_key();
        Self {
            object,
            parents: base.heads.clone(),
            factory: DatomFactory::new(lamport, device.origin(), change, 0),
            ids,
            dirty: Vec::new(),
            deleted: HashSet::new(),
        }
    }

    /// Object being edited.
    #[must_use]
    pub const fn object(&self) -> Cid {
        self.object
    }

    /// Heads the change will name as parents.
    #[must_use]
    pub fn parents(&self) -> &[Cid] {
        &self.parents
    }

    /// Lamport time of the future change.
    #[must_use]
    pub const fn lamport(&self) -> u64 {
        self.factory.lamport()
    }

    /// Key stamped on every draft datom.
    #[must_use]
    pub const fn change_key(&self) -> ChangeKey {
        self.factory.change()
    }

    /// Every datom minted so far, superseded ones included.
    #[must_use]
    pub fn dirty(&self) -> &[Datom] {
        &self.dirty
    }

    /// Ops superseded within this draft.
    #[must_use]
    pub fn deleted(&self) -> Vec<OpId> {
        let mut ops: Vec<OpId> = self.deleted.iter().copied().collect();
        ops.sort_by_key(|o| o.seq);
        ops
    }

    /// Datoms that go into the published body.
    #[must_use]
    pub fn body(&self) -> Vec<Datom> {
        self.dirty
            .iter()
            .filter(|d| !self.deleted.contains(&d.op))
            .cloned()
            .collect()
    }

    /// Whether publishing would produce an empty body.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dirty.iter().all(|d| self.deleted.contains(&d.op))
    }

    pub(crate) fn mint(&mut self, entity: NodeId, attribute: &'static str, value: impl Into<Value>) -> Datom {
        self.factory.mint(entity, Attribute::from_static(attribute), value)
    }

    pub(crate) fn mint_node(&mut self) -> NodeId {
        self.ids.mint()
    }

    pub(crate) fn push(&mut self, datom: Datom) {
        self.dirty.push(datom);
    }

    /// Mark `op` superseded if it was minted by this draft.
    pub(crate) fn supersede(&mut self, op: OpId) {
        if !op.is_zero() && op.change == self.change_key() {
            self.deleted.insert(op);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{Codec, DeviceKey};
    use crate::document::attrs;

    fn draft() -> Draft {
        let device = DeviceKey::from_bytes(&[1; 32]).public();
        let base = Version::new(1, vec![Cid::of(Codec::DagCbor, b"head")]);
        Draft::new(
            Cid::of(Codec::DagCbor, b"obj"),
            &base,
            5,
            device,
            NodeIdGenerator::from_seed(3),
        )
    }

    #[test]
    fn datoms_carry_draft_stamp() {
        let mut d = draft();
        let datom = d.mint(NodeId::ROOT, attrs::TITLE, "x");
        assert_eq!(datom.op.lamport, 5);
        assert_eq!(datom.op.change, d.change_key());
        assert!(!d.change_key().is_zero());
        assert_eq!(d.parents().len(), 1);
    }

    #[test]
    fn superseded_datoms_leave_the_body() {
        let mut d = draft();
        let a = d.mint(NodeId::ROOT, attrs::TITLE, "a");
        let b = d.mint(NodeId::ROOT, attrs::TITLE, "b");
        d.push(a.clone());
        d.push(b.clone());
        d.supersede(a.op);
        assert_eq!(d.body(), vec![b]);
        assert_eq!(d.deleted(), vec![a.op]);
        assert!(!d.is_empty());
    }

    #[test]
    fn foreign_ops_are_never_superseded() {
        let mut d = draft();
        let foreign = OpId::new(1, crate::model::Origin(9), ChangeKey(77), 1);
        d.supersede(foreign);
        d.supersede(OpId::ZERO);
        assert!(d.deleted().is_empty());
        assert!(d.is_empty());
    }
}
