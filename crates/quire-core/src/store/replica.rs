//! One device's view of a set of objects.
//!
//! A [`Replica`] owns a store, the device and account keys, a node id
//! generator, and one [`ChangeDag`] per known object. Local edits go
//! through [`Replica::open`] and [`Replica::commit`]; remote changes
//! arrive as raw bytes through [`Replica::receive`] and are buffered until
//! their parents are present, so the DAG never holds a change whose
//! ancestry is incomplete.

use std::collections::HashMap;

use tracing::{info, warn};

use super::load::{load_document, replay_heads};
use super::{BlobStore, DatomIndex, LocalIds, MemoryStore, VersionStore};
use crate::change::{AccountKey, ChangeDag, Cid, Codec, DOCUMENT_TYPE, DeviceKey, Permanode, PublicKey, SignedChange};
use crate::config::EngineConfig;
use crate::document::{Document, Draft};
use crate::error::{Error, ObjectKind, Result};
use crate::model::NodeIdGenerator;
use crate::version::Version;

/// Name of the version a replica keeps at its latest heads.
pub const MAIN_VERSION: &str = "main";

/// What [`Replica::receive`] did with a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Inserted, along with `unblocked` buffered changes it released.
    Applied {
        /// Change id.
        id: Cid,
        /// Buffered changes applied as a consequence.
        unblocked: usize,
    },
    /// Held back until `missing` arrive. An unknown object shows up as its
    /// own id in `missing`.
    Buffered {
        /// Change id.
        id: Cid,
        /// Ids still absent.
        missing: Vec<Cid>,
    },
    /// Already applied or already buffered.
    Duplicate(Cid),
}

/// Store plus identity plus per-object DAGs.
pub struct Replica<S = MemoryStore> {
    store: S,
    device: DeviceKey,
    account: AccountKey,
    ids: NodeIdGenerator,
    config: EngineConfig,
    dags: HashMap<Cid, ChangeDag>,
    pending: Vec<SignedChange>,
}

impl<S> Replica<S>
where
    S: BlobStore + LocalIds + VersionStore + DatomIndex,
{
    /// Replica over `store`. Node ids are seeded from `config.ids.seed`
    /// when set.
    pub fn new(store: S, device: DeviceKey, account: AccountKey, config: EngineConfig) -> Self {
        let ids = config
            .ids
            .seed
            .map_or_else(NodeIdGenerator::new, NodeIdGenerator::from_seed);
        Self {
            store,
            device,
            account,
            ids,
            config,
            dags: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Public key of this device.
    pub fn device(&self) -> PublicKey {
        self.device.public()
    }

    /// Active config.
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Backing store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// DAG of a known object.
    pub fn dag(&self, object: &Cid) -> Option<&ChangeDag> {
        self.dags.get(object)
    }

    /// Number of changes waiting for parents.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Ids of known objects, sorted.
    pub fn objects(&self) -> Vec<Cid> {
        let mut out: Vec<Cid> = self.dags.keys().copied().collect();
        out.sort_unstable();
        out
    }

    fn dag_for(&self, object: &Cid) -> Result<&ChangeDag> {
        self.dags
            .get(object)
            .ok_or_else(|| Error::not_found(ObjectKind::Permanode, object))
    }

    /// Create a new document owned by this replica's account.
    ///
    /// # Errors
    ///
    /// Encoding and store errors.
    pub fn create_document(&mut self, now: i64) -> Result<Cid> {
        let permanode = Permanode::document(self.account.public(), now, self.ids.rng());
        let id = self.adopt_permanode(permanode.encode()?)?;
        info!(object = %id, "created document");
        Ok(id)
    }

    /// Permanode blob of a known object, for sharing.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the object is unknown.
    pub fn permanode(&self, object: &Cid) -> Result<Vec<u8>> {
        self.dag_for(object)?;
        self.store.get(object)
    }

    /// Learn about an object from its permanode blob. Buffered changes of
    /// that object are applied right away.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] for anything that is not a document permanode.
    pub fn receive_permanode(&mut self, bytes: Vec<u8>) -> Result<Cid> {
        let permanode = Permanode::decode(&bytes)?;
        if permanode.object_type != DOCUMENT_TYPE {
            return Err(Error::malformed(
                "permanode",
                format!("object type {:?} is not a document", permanode.object_type),
            ));
        }
        let id = self.adopt_permanode(bytes)?;
        self.drain_pending();
        Ok(id)
    }

    fn adopt_permanode(&mut self, bytes: Vec<u8>) -> Result<Cid> {
        let id = Cid::of(Codec::DagCbor, &bytes);
        self.store.put(id, bytes)?;
        self.store.ensure_local_id(&id);
        if !self.dags.contains_key(&id) {
            self.dags.insert(id, ChangeDag::new(id));
            self.store
                .save_version(&id, &self.device.public(), MAIN_VERSION, &Version::empty())?;
        }
        Ok(id)
    }

    /// Editable document at the current heads.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown objects, then replay errors.
    pub fn open(&mut self, object: &Cid) -> Result<Document> {
        let dag = self
            .dags
            .get(object)
            .ok_or_else(|| Error::not_found(ObjectKind::Permanode, object))?;
        let heads = dag.heads();
        let draft = Draft::new(
            *object,
            &dag.version(),
            dag.next_lamport(&heads),
            self.device.public(),
            self.ids.fork(),
        );
        let mut doc = Document::with_draft(self.config.ordering.policy, draft);
        replay_heads(&mut doc, dag, &heads)?;
        Ok(doc)
    }

    /// Read-only document at the current heads, from memory.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown objects, then replay errors.
    pub fn view(&self, object: &Cid) -> Result<Document> {
        let dag = self.dag_for(object)?;
        let mut doc = Document::new(self.config.ordering.policy);
        replay_heads(&mut doc, dag, &dag.heads())?;
        Ok(doc)
    }

    /// Read-only document at the saved `"main"` version, through the store.
    ///
    /// # Errors
    ///
    /// Anything [`load_document`] reports.
    pub fn load(&self, object: &Cid) -> Result<Document> {
        let version = self
            .store
            .get_version(object, &self.device.public(), MAIN_VERSION)?;
        load_document(&self.store, object, &version, &self.config)
    }

    /// Current version of a known object.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown objects.
    pub fn version(&self, object: &Cid) -> Result<Version> {
        Ok(self.dag_for(object)?.version())
    }

    /// Publish the draft of `doc` and apply it locally.
    ///
    /// # Errors
    ///
    /// Publishing errors ([`Error::NotEditable`], [`Error::EmptyDraft`]),
    /// then DAG and store errors.
    pub fn commit(&mut self, doc: &mut Document, now: i64) -> Result<SignedChange> {
        let signed = doc.publish(self.account.public(), &self.device, now)?;
        self.apply(signed.clone())?;
        Ok(signed)
    }

    /// Accept a change blob from elsewhere.
    ///
    /// # Errors
    ///
    /// Decoding and, unless disabled in config, signature errors. DAG
    /// errors for this change when it applies directly. Buffered changes
    /// it releases are applied best effort.
    pub fn receive(&mut self, bytes: Vec<u8>) -> Result<ReceiveOutcome> {
        let decoded = if self.config.replay.verify_signatures {
            SignedChange::from_bytes(bytes)
        } else {
            SignedChange::from_bytes_unverified(bytes)
        };
        let signed = match decoded {
            Ok(signed) => signed,
            Err(e) => {
                warn!(error = %e, code = ?e.code(), "rejected remote change");
                return Err(e);
            }
        };

        let id = signed.id();
        let object = signed.change().object;
        let applied = self.dags.get(&object).is_some_and(|dag| dag.contains(&id));
        if applied || self.pending.iter().any(|p| p.id() == id) {
            return Ok(ReceiveOutcome::Duplicate(id));
        }

        let missing = self.missing_for(&signed);
        if !missing.is_empty() {
            warn!(
                change = %id,
                object = %object,
                missing = missing.len(),
                "buffered change until parents arrive"
            );
            self.pending.push(signed);
            return Ok(ReceiveOutcome::Buffered { id, missing });
        }

        if let Err(e) = self.apply(signed) {
            warn!(change = %id, error = %e, "rejected remote change");
            return Err(e);
        }
        let unblocked = self.drain_pending();
        Ok(ReceiveOutcome::Applied { id, unblocked })
    }

    /// Every change of `object` in causal order, as published bytes.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown objects.
    pub fn changes(&self, object: &Cid) -> Result<Vec<Vec<u8>>> {
        let dag = self.dag_for(object)?;
        Ok(dag
            .causal_order(&dag.heads())?
            .into_iter()
            .map(|c| c.bytes().to_vec())
            .collect())
    }

    fn missing_for(&self, change: &SignedChange) -> Vec<Cid> {
        let object = change.change().object;
        self.dags
            .get(&object)
            .map_or_else(|| vec![object], |dag| dag.missing_parents(change))
    }

    /// Apply every buffered change whose parents are now present. A change
    /// that fails to apply is dropped and logged; it never fails the change
    /// that released it.
    fn drain_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Some(pos) = self
            .pending
            .iter()
            .position(|c| self.missing_for(c).is_empty())
        {
            let change = self.pending.remove(pos);
            let id = change.id();
            match self.apply(change) {
                Ok(()) => applied += 1,
                Err(e) => warn!(change = %id, error = %e, code = ?e.code(), "dropped buffered change"),
            }
        }
        applied
    }

    fn apply(&mut self, signed: SignedChange) -> Result<()> {
        let id = signed.id();
        let object = signed.change().object;
        let parents = signed.change().parents.clone();
        let bytes = signed.bytes().to_vec();
        let datoms = signed.datoms()?;

        let dag = self
            .dags
            .get_mut(&object)
            .ok_or_else(|| Error::not_found(ObjectKind::Permanode, object))?;
        if !dag.insert(signed)? {
            return Ok(());
        }
        let version = dag.version();

        self.store.put(id, bytes)?;
        self.store.ensure_local_id(&id);
        self.store.record_change_edges(&id, &parents);
        self.store.put_datoms(&object, &datoms)?;
        self.store
            .save_version(&object, &self.device.public(), MAIN_VERSION, &version)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
