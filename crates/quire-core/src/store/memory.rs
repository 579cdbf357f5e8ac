//! In-memory reference store.

use std::collections::{BTreeMap, HashMap};

use super::{BlobStore, DatomIndex, LocalId, LocalIds, VersionStore};
use crate::change::{Cid, PublicKey};
use crate::error::{Error, ObjectKind, Result};
use crate::model::{Datom, NodeId, OpId};
use crate::version::Version;

type VersionKey = (Cid, PublicKey, String);
type IndexKey = (NodeId, String);

/// Everything in hash maps. Not shared between threads.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    blobs: HashMap<Cid, Vec<u8>>,
    local_ids: HashMap<Cid, LocalId>,
    by_local_id: Vec<Cid>,
    edges: HashMap<Cid, Vec<Cid>>,
    versions: HashMap<VersionKey, Version>,
    index: HashMap<Cid, BTreeMap<IndexKey, Vec<Datom>>>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }
}

impl BlobStore for MemoryStore {
    fn has(&self, id: &Cid) -> bool {
        self.blobs.contains_key(id)
    }

    fn get(&self, id: &Cid) -> Result<Vec<u8>> {
        self.blobs
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(ObjectKind::Blob, id))
    }

    fn put(&mut self, id: Cid, bytes: Vec<u8>) -> Result<()> {
        self.blobs.entry(id).or_insert(bytes);
        Ok(())
    }
}

impl LocalIds for MemoryStore {
    fn ensure_local_id(&mut self, cid: &Cid) -> LocalId {
        if let Some(id) = self.local_ids.get(cid) {
            return *id;
        }
        let id = LocalId(self.by_local_id.len() as u64 + 1);
        self.by_local_id.push(*cid);
        self.local_ids.insert(*cid, id);
        id
    }

    fn lookup_local_id(&self, cid: &Cid) -> Result<LocalId> {
        self.local_ids
            .get(cid)
            .copied()
            .ok_or_else(|| Error::not_found(ObjectKind::LocalId, cid))
    }

    fn resolve(&self, id: LocalId) -> Result<Cid> {
        usize::try_from(id.0)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| self.by_local_id.get(i))
            .copied()
            .ok_or_else(|| Error::not_found(ObjectKind::LocalId, id))
    }

    fn record_change_edges(&mut self, change: &Cid, parents: &[Cid]) {
        self.edges.insert(*change, parents.to_vec());
    }

    fn change_parents(&self, change: &Cid) -> Result<Vec<Cid>> {
        self.edges
            .get(change)
            .cloned()
            .ok_or_else(|| Error::not_found(ObjectKind::Change, change))
    }
}

impl VersionStore for MemoryStore {
    fn save_version(&mut self, object: &Cid, device: &PublicKey, name: &str, version: &Version) -> Result<()> {
        self.versions
            .insert((*object, *device, name.to_string()), version.clone());
        Ok(())
    }

    fn get_version(&self, object: &Cid, device: &PublicKey, name: &str) -> Result<Version> {
        self.versions
            .get(&(*object, *device, name.to_string()))
            .cloned()
            .ok_or_else(|| Error::not_found(ObjectKind::Version, format!("{object}/{device}/{name}")))
    }

    fn delete_version(&mut self, object: &Cid, device: &PublicKey, name: &str) -> Result<()> {
        self.versions.remove(&(*object, *device, name.to_string()));
        Ok(())
    }
}

fn op_key(d: &Datom) -> (u64, u64, u64, u32) {
    (d.op.lamport, d.op.origin.0, d.op.change.0, d.op.seq)
}

impl DatomIndex for MemoryStore {
    fn put_datoms(&mut self, object: &Cid, datoms: &[Datom]) -> Result<()> {
        let index = self.index.entry(*object).or_default();
        for d in datoms {
            let slot = index
                .entry((d.entity, d.attribute.as_str().to_string()))
                .or_default();
            if !slot.iter().any(|x| x.op == d.op) {
                slot.push(d.clone());
            }
        }
        Ok(())
    }

    fn delete_ops(&mut self, object: &Cid, ops: &[OpId]) -> Result<()> {
        if let Some(index) = self.index.get_mut(object) {
            for slot in index.values_mut() {
                slot.retain(|d| !ops.contains(&d.op));
            }
            index.retain(|_, slot| !slot.is_empty());
        }
        Ok(())
    }

    fn lookup(&self, object: &Cid, entity: NodeId, attribute: &str) -> Vec<Datom> {
        let mut out = self
            .index
            .get(object)
            .and_then(|index| index.get(&(entity, attribute.to_string())))
            .cloned()
            .unwrap_or_default();
        out.sort_by_key(op_key);
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
