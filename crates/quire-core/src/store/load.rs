//! Assembling documents from stored changes.

use std::collections::{HashMap, HashSet};

use tracing::info;

use super::BlobStore;
use crate::change::{ChangeDag, Cid, Codec, DOCUMENT_TYPE, Permanode, SignedChange};
use crate::config::EngineConfig;
use crate::document::Document;
use crate::error::{Error, ObjectKind, Result};
use crate::model::ChangeKey;
use crate::version::Version;

/// Fetch every change reachable from `heads` and build the DAG.
///
/// # Errors
///
/// - [`Error::NotFound`] for any missing blob, unchanged.
/// - Decoding and, with `verify`, signature errors.
/// - [`Error::Malformed`] if a blob does not hash to the id it was
///   fetched under.
/// - DAG insertion errors.
pub fn load_dag<S: BlobStore + ?Sized>(store: &S, object: &Cid, heads: &[Cid], verify: bool) -> Result<ChangeDag> {
    let mut visited = HashSet::new();
    let mut stack = heads.to_vec();
    let mut changes = Vec::new();

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let bytes = store.get(&id)?;
        let signed = if verify {
            SignedChange::from_bytes(bytes)?
        } else {
            SignedChange::from_bytes_unverified(bytes)?
        };
        if signed.id() != id {
            return Err(Error::malformed(
                "change blob",
                format!("stored under {id} but hashes to {}", signed.id()),
            ));
        }
        stack.extend(signed.change().parents.iter().copied());
        changes.push(signed);
    }

    changes.sort_by_key(|c| (c.change().lamport_time, c.id()));
    let mut dag = ChangeDag::new(*object);
    for change in changes {
        dag.insert(change)?;
    }
    Ok(dag)
}

/// Replay every change reachable from `heads` into an empty document.
pub(crate) fn replay_heads(doc: &mut Document, dag: &ChangeDag, heads: &[Cid]) -> Result<()> {
    let mut datoms = Vec::new();
    let mut times: HashMap<ChangeKey, i64> = HashMap::new();
    for change in dag.causal_order(heads)? {
        times.insert(ChangeKey::from(change.id()), change.change().create_time);
        datoms.extend(change.datoms()?);
    }

    doc.order().sort_by_op(&mut datoms, |d| d.op)?;
    doc.replay(&datoms)?;

    if let Some(time) = times.get(&doc.last_op().change) {
        doc.set_update_time(*time);
    }
    Ok(())
}

/// Read-only document for `object` at `version`.
///
/// # Errors
///
/// - [`Error::NotFound`] with [`ObjectKind::Permanode`] if the object is
///   unknown, or the store's own `NotFound` for a missing change.
/// - [`Error::Malformed`] if the permanode is not a document.
/// - Anything [`load_dag`] or [`Document::replay`] reports.
pub fn load_document<S: BlobStore + ?Sized>(
    store: &S,
    object: &Cid,
    version: &Version,
    config: &EngineConfig,
) -> Result<Document> {
    let bytes = match store.get(object) {
        Ok(bytes) => bytes,
        Err(Error::NotFound { .. }) => return Err(Error::not_found(ObjectKind::Permanode, object)),
        Err(e) => return Err(e),
    };
    if Cid::of(Codec::DagCbor, &bytes) != *object {
        return Err(Error::malformed("permanode", format!("blob does not hash to {object}")));
    }
    let permanode = Permanode::decode(&bytes)?;
    if permanode.object_type != DOCUMENT_TYPE {
        return Err(Error::malformed(
            "permanode",
            format!("object type {:?} is not a document", permanode.object_type),
        ));
    }

    let dag = load_dag(store, object, &version.heads, config.replay.verify_signatures)?;
    let mut doc = Document::new(config.ordering.policy);
    replay_heads(&mut doc, &dag, &version.heads)?;

    info!(
        object = %object,
        version = %version,
        changes = dag.len(),
        "loaded document"
    );
    Ok(doc)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::change::{AccountKey, Change, DeviceKey};
    use crate::document::Draft;
    use crate::model::{NodeIdGenerator, OpOrder};
    use crate::store::MemoryStore;

    struct Fixture {
        store: MemoryStore,
        object: Cid,
        device: DeviceKey,
        account: AccountKey,
    }

    impl Fixture {
        fn new() -> Self {
            let mut rng = StdRng::seed_from_u64(5);
            let device = DeviceKey::new(&mut rng);
            let account = AccountKey::new(&mut rng);
            let permanode = Permanode::document(account.public(), 10, &mut rng);
            let bytes = permanode.encode().expect("encode");
            let object = Cid::of(Codec::DagCbor, &bytes);
            let mut store = MemoryStore::new();
            store.put(object, bytes).expect("put");
            Self {
                store,
                object,
                device,
                account,
            }
        }

        fn edit(&mut self, base: &Version, lamport: u64, title: &str, now: i64) -> SignedChange {
            let draft = Draft::new(
                self.object,
                base,
                lamport,
                self.device.public(),
                NodeIdGenerator::from_seed(lamport),
            );
            let mut doc = Document::with_draft(OpOrder::Strict, draft);
            doc.change_title(title).expect("title");
            let signed = doc
                .publish(self.account.public(), &self.device, now)
                .expect("publish");
            self.store
                .put(signed.id(), signed.bytes().to_vec())
                .expect("put");
            signed
        }
    }

    #[test]
    fn empty_version_loads_empty_document() {
        let f = Fixture::new();
        let doc = load_document(&f.store, &f.object, &Version::empty(), &EngineConfig::default()).expect("load");
        assert_eq!(doc.title(), "");
        assert!(!doc.is_editable());
        assert!(doc.update_time().is_none());
    }

    #[test]
    fn chain_replays_latest_title_and_update_time() {
        let mut f = Fixture::new();
        let a = f.edit(&Version::empty(), 1, "first", 1_000);
        let b = f.edit(&Version::new(1, vec![a.id()]), 2, "second", 2_000);

        let version = Version::new(2, vec![b.id()]);
        let doc = load_document(&f.store, &f.object, &version, &EngineConfig::default()).expect("load");
        assert_eq!(doc.title(), "second");
        assert_eq!(doc.update_time().map(|t| t.timestamp_micros()), Some(2_000));
    }

    #[test]
    fn child_below_parent_lamport_is_rejected_on_load() {
        let mut f = Fixture::new();
        let a = f.edit(&Version::empty(), 5, "parent", 1);
        let b = f.edit(&Version::new(1, vec![a.id()]), 3, "child", 2);

        let version = Version::new(2, vec![b.id()]);
        let err = load_document(&f.store, &f.object, &version, &EngineConfig::default()).expect_err("violation");
        assert!(matches!(
            err,
            Error::LamportViolation { lamport: 3, parent_lamport: 5, .. }
        ));
    }

    #[test]
    fn unknown_object_is_permanode_not_found() {
        let f = Fixture::new();
        let ghost = Cid::of(Codec::DagCbor, b"ghost");
        let err = load_document(&f.store, &ghost, &Version::empty(), &EngineConfig::default()).expect_err("missing");
        assert!(matches!(err, Error::NotFound { kind: ObjectKind::Permanode, .. }));
    }

    #[test]
    fn missing_change_propagates_not_found() {
        let mut f = Fixture::new();
        let a = f.edit(&Version::empty(), 1, "first", 1);
        let b = f.edit(&Version::new(1, vec![a.id()]), 2, "second", 2);

        let mut partial = MemoryStore::new();
        partial.put(f.object, f.store.get(&f.object).expect("permanode")).expect("put");
        partial.put(b.id(), b.bytes().to_vec()).expect("put");

        let version = Version::new(2, vec![b.id()]);
        let err = load_document(&partial, &f.object, &version, &EngineConfig::default()).expect_err("gap");
        assert!(err.is_recoverable());
        assert!(matches!(err, Error::NotFound { kind: ObjectKind::Blob, .. }));
    }

    #[test]
    fn blob_under_wrong_id_is_malformed() {
        let mut f = Fixture::new();
        let a = f.edit(&Version::empty(), 1, "first", 1);
        let fake = Cid::of(Codec::DagCbor, b"elsewhere");
        f.store.put(fake, a.bytes().to_vec()).expect("put");

        let err = load_dag(&f.store, &f.object, &[fake], true).expect_err("mismatch");
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[test]
    fn non_document_permanode_is_rejected() {
        let mut f = Fixture::new();
        let mut rng = StdRng::seed_from_u64(6);
        let mut other = Permanode::document(f.account.public(), 1, &mut rng);
        other.object_type = "quire/other".to_string();
        let bytes = other.encode().expect("encode");
        let id = Cid::of(Codec::DagCbor, &bytes);
        f.store.put(id, bytes).expect("put");

        let err = load_document(&f.store, &id, &Version::empty(), &EngineConfig::default()).expect_err("type");
        assert!(matches!(err, Error::Malformed { what: "permanode", .. }));
    }

    #[test]
    fn tampered_signature_fails_when_verifying() {
        let mut f = Fixture::new();
        let mut change = Change::new(
            f.object,
            f.account.public(),
            Vec::new(),
            1,
            Vec::new(),
            1,
            f.device.public(),
        );
        change.signature = Some(vec![0; 64]);
        let bytes = change.encode().expect("encode");
        let id = Cid::of(Codec::DagCbor, &bytes);
        f.store.put(id, bytes).expect("put");

        let err = load_dag(&f.store, &f.object, &[id], true).expect_err("bad sig");
        assert!(matches!(err, Error::SignatureInvalid { .. }));
        let dag = load_dag(&f.store, &f.object, &[id], false).expect("unverified");
        assert_eq!(dag.len(), 1);
    }
}
